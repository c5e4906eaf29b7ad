//! Backfill task payloads and the time-window arithmetic used to carve a
//! historical range into overlapping one-minute slices.

use crate::market::types::{Cursor, PageQuery, Timestamp};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Distance between consecutive window starts, in seconds.
pub const WINDOW_STEP_SECS: i64 = 60;
const WINDOW_LEAD_SECS: i64 = 1;
const WINDOW_TAIL_SECS: i64 = 61;

/// `[from, to]` bounds handed to the listings endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Timestamp,
    pub to: Timestamp,
}

impl TimeWindow {
    /// Window for the step starting at `start`: one second of lead and a
    /// second of overlap into the next step.
    pub fn at_step(start: Timestamp) -> Self {
        Self {
            from: start.saturating_sub(WINDOW_LEAD_SECS),
            to: start.saturating_add(WINDOW_TAIL_SECS),
        }
    }

    /// Windows for every step `t = from, from + 60, ...` with `t <= to`.
    /// Yields nothing when `from > to`.
    pub fn split(from: Timestamp, to: Timestamp) -> WindowSteps {
        WindowSteps {
            next: Some(from),
            end: to,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            format_timestamp(Some(self.from)),
            format_timestamp(Some(self.to))
        )
    }
}

pub struct WindowSteps {
    next: Option<Timestamp>,
    end: Timestamp,
}

impl Iterator for WindowSteps {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next.filter(|start| *start <= self.end)?;
        self.next = start.checked_add(WINDOW_STEP_SECS);
        Some(TimeWindow::at_step(start))
    }
}

/// `yyyy-MM-dd HH:mm:ss` in UTC, or `-` when unbounded.
pub fn format_timestamp(ts: Option<Timestamp>) -> String {
    match ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single()) {
        Some(moment) => moment.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_owned(),
    }
}

/// Payload of one backfill job: which window to read and where to resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillTask {
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub cursor: Option<Cursor>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub attempts_made: u32,
}

impl BackfillTask {
    pub fn new(
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        cursor: Option<Cursor>,
        priority: i32,
    ) -> Self {
        Self {
            from,
            to,
            cursor,
            priority,
            attempts_made: 0,
        }
    }

    pub fn for_window(window: TimeWindow) -> Self {
        Self::new(Some(window.from), Some(window.to), None, 0)
    }

    pub fn window(&self) -> Option<TimeWindow> {
        match (self.from, self.to) {
            (Some(from), Some(to)) => Some(TimeWindow { from, to }),
            _ => None,
        }
    }

    /// Same window and priority, resuming at `next`.
    pub fn continuation(&self, next: Cursor) -> Self {
        Self {
            cursor: Some(next),
            attempts_made: 0,
            ..self.clone()
        }
    }

    /// Same window, priority, and cursor, one attempt later.
    pub fn retry(&self) -> Self {
        Self {
            attempts_made: self.attempts_made.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn page_query(&self, page_size: usize) -> PageQuery {
        PageQuery::newest_first(page_size)
            .with_cursor(self.cursor.clone())
            .listed_between(self.from, self.to)
    }
}

/// Result of executing one backfill task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The window has no further pages.
    Completed,
    /// Another page exists at `cursor`.
    Continue { cursor: Cursor },
    /// The page could not be fetched or stored; re-run with the same cursor.
    RetryWithCursor { cursor: Option<Cursor> },
}

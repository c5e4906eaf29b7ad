//! Tip sync: walk the newest listings until a page adds nothing new.

use crate::market::client::OrderSource;
use crate::market::types::{Cursor, PageQuery};
use crate::orders::page::PagePipeline;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TipSyncReport {
    pub pages: usize,
    pub received: usize,
    pub inserted: usize,
    pub dispatched: usize,
    /// Creation time of the last listing on the final page.
    pub reached: Option<DateTime<Utc>>,
}

pub struct TipSync {
    source: Arc<dyn OrderSource>,
    pipeline: Arc<PagePipeline>,
    page_size: usize,
    telemetry: Arc<Telemetry>,
}

impl TipSync {
    pub fn new(
        source: Arc<dyn OrderSource>,
        pipeline: Arc<PagePipeline>,
        page_size: usize,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            source,
            pipeline,
            page_size,
            telemetry,
        }
    }

    /// Fetches newest-first pages and stops at the first page that inserts
    /// zero rows. An exhausted cursor restarts from the newest page.
    pub async fn run(&self) -> Result<TipSyncReport> {
        let mut report = TipSyncReport::default();
        let mut cursor: Option<Cursor> = None;

        loop {
            let query = PageQuery::newest_first(self.page_size).with_cursor(cursor.take());
            let page = match self.source.fetch_page(&query).await {
                Ok(page) => page,
                Err(err) => {
                    self.telemetry.record_fetch_error();
                    return Err(err.context("tip sync page fetch failed"));
                }
            };
            self.telemetry.record_page(page.orders.len(), page.malformed);

            let ingest = self
                .pipeline
                .ingest(&page.orders)
                .await
                .context("tip sync page could not be stored")?;

            report.pages += 1;
            report.received += ingest.received;
            report.inserted += ingest.inserted;
            report.dispatched += ingest.dispatched;
            if let Some(last) = page.orders.last() {
                report.reached = Some(last.created_at());
            }
            cursor = page.next;

            if ingest.inserted > 0 {
                tracing::info!(new_listings = ingest.inserted, "new listings found");
            }

            if ingest.inserted == 0 {
                tracing::info!(
                    pages = report.pages,
                    inserted = report.inserted,
                    reached = ?report.reached,
                    "tip sync caught up"
                );
                return Ok(report);
            }
        }
    }

    pub(crate) fn spawn_loop(
        self: Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        // A pass can page for a long time while the feed keeps
                        // producing listings; shutdown abandons it mid-walk.
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => {
                                tracing::info!("tip sync pass interrupted by shutdown");
                                break;
                            }
                            result = self.run() => {
                                if let Err(err) = result {
                                    tracing::warn!(error = %err, "tip sync pass failed");
                                }
                            }
                        }
                    }
                }
            }

            tracing::info!("tip sync loop stopped");
        })
    }
}

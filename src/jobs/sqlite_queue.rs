//! Durable job queue on SQLite. Jobs that were in flight when the process
//! stopped go back to waiting on the next open.

use crate::jobs::queue::{
    EnqueueOptions, FollowUp, JobHandle, JobId, JobQueue, QueueFuture, ReservedJob,
};
use crate::jobs::task::BackfillTask;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Completed jobs kept for inspection.
pub const KEEP_COMPLETED: usize = 100;
/// Failed jobs kept for inspection.
pub const KEEP_FAILED: usize = 1_000;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS backfill_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    run_at INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'waiting',
    reservations INTEGER NOT NULL DEFAULT 0,
    enqueued_at INTEGER NOT NULL,
    finished_at INTEGER,
    failure TEXT
);

CREATE INDEX IF NOT EXISTS idx_backfill_jobs_ready
    ON backfill_jobs(state, priority, id);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

/// Row counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct SqliteJobQueue {
    conn: Arc<Mutex<Connection>>,
    notify: Arc<Notify>,
}

impl SqliteJobQueue {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("failed to open job queue at {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("failed to set job queue busy timeout")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory job queue")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply job queue schema")?;
        let queue = Self {
            conn: Arc::new(Mutex::new(conn)),
            notify: Arc::new(Notify::new()),
        };

        let recovered = queue.recover_stalled()?;
        if recovered > 0 {
            tracing::warn!(recovered, "re-queued backfill jobs left in flight by a previous run");
        }
        Ok(queue)
    }

    /// Moves every in-flight job back to waiting.
    pub fn recover_stalled(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let moved = conn.execute(
            "UPDATE backfill_jobs SET state = ?1 WHERE state = ?2",
            params![JobState::Waiting.as_str(), JobState::Active.as_str()],
        )?;
        Ok(moved)
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT state, COUNT(*) FROM backfill_jobs GROUP BY state")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (state, count) = row?;
            let count = count as usize;
            match state.as_str() {
                "waiting" => counts.waiting = count,
                "active" => counts.active = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            op(&mut guard)
        })
        .await
        .context("job queue task failed")?
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn insert_job(conn: &Connection, task: &BackfillTask, options: EnqueueOptions) -> Result<JobId> {
    let payload = serde_json::to_string(task).context("failed to encode backfill task")?;
    let now = now_millis();
    let delay_ms = i64::try_from(options.delay.as_millis()).unwrap_or(i64::MAX);
    conn.execute(
        "INSERT INTO backfill_jobs (payload, priority, run_at, state, enqueued_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            payload,
            options.priority,
            now.saturating_add(delay_ms),
            JobState::Waiting.as_str(),
            now
        ],
    )?;
    Ok(conn.last_insert_rowid() as JobId)
}

fn reserve_job(conn: &mut Connection) -> Result<Option<ReservedJob>> {
    let tx = conn.transaction()?;
    let now = now_millis();
    let reserved = loop {
        let next: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, payload FROM backfill_jobs \
                 WHERE state = ?1 AND run_at <= ?2 \
                 ORDER BY priority ASC, id ASC LIMIT 1",
                params![JobState::Waiting.as_str(), now],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, payload)) = next else {
            break None;
        };

        match serde_json::from_str::<BackfillTask>(&payload) {
            Ok(task) => {
                tx.execute(
                    "UPDATE backfill_jobs SET state = ?1, reservations = reservations + 1 WHERE id = ?2",
                    params![JobState::Active.as_str(), id],
                )?;
                break Some(ReservedJob {
                    id: id as JobId,
                    task,
                });
            }
            Err(err) => {
                tracing::warn!(job = id, error = %err, "discarding undecodable backfill job");
                tx.execute(
                    "UPDATE backfill_jobs SET state = ?1, finished_at = ?2, failure = ?3 \
                     WHERE id = ?4 AND state = ?5",
                    params![
                        JobState::Failed.as_str(),
                        now_millis(),
                        err.to_string(),
                        id,
                        JobState::Waiting.as_str()
                    ],
                )?;
                prune_finished(&tx, JobState::Failed)?;
            }
        }
    };
    tx.commit()?;
    Ok(reserved)
}

/// Moves an active job to `state`. Jobs that were never reserved are left
/// alone.
fn finish_job(conn: &Connection, id: JobId, state: JobState, failure: Option<&str>) -> Result<()> {
    let updated = conn.execute(
        "UPDATE backfill_jobs SET state = ?1, finished_at = ?2, failure = ?3 \
         WHERE id = ?4 AND state = ?5",
        params![
            state.as_str(),
            now_millis(),
            failure,
            id as i64,
            JobState::Active.as_str()
        ],
    )?;
    if updated == 0 {
        bail!("job {id} is not in flight");
    }
    prune_finished(conn, state)
}

fn prune_finished(conn: &Connection, state: JobState) -> Result<()> {
    let keep = match state {
        JobState::Failed => KEEP_FAILED,
        _ => KEEP_COMPLETED,
    };
    conn.execute(
        "DELETE FROM backfill_jobs WHERE state = ?1 AND id NOT IN \
         (SELECT id FROM backfill_jobs WHERE state = ?1 ORDER BY id DESC LIMIT ?2)",
        params![state.as_str(), keep as i64],
    )?;
    Ok(())
}

fn settle_job(
    conn: &mut Connection,
    id: JobId,
    follow_up: Option<FollowUp>,
) -> Result<Option<JobHandle>> {
    let tx = conn.transaction()?;
    finish_job(&tx, id, JobState::Completed, None)?;
    let handle = match follow_up {
        Some(next) => Some(JobHandle {
            id: insert_job(&tx, &next.task, next.options)?,
        }),
        None => None,
    };
    tx.commit()?;
    Ok(handle)
}

impl JobQueue for SqliteJobQueue {
    fn enqueue(&self, task: BackfillTask, options: EnqueueOptions) -> QueueFuture<'_, JobHandle> {
        Box::pin(async move {
            let id = self
                .blocking(move |conn| insert_job(conn, &task, options))
                .await?;
            self.notify.notify_waiters();
            Ok(JobHandle { id })
        })
    }

    fn reserve(&self) -> QueueFuture<'_, Option<ReservedJob>> {
        Box::pin(self.blocking(reserve_job))
    }

    fn complete_with(
        &self,
        id: JobId,
        follow_up: Option<FollowUp>,
    ) -> QueueFuture<'_, Option<JobHandle>> {
        Box::pin(async move {
            let handle = self
                .blocking(move |conn| settle_job(conn, id, follow_up))
                .await?;
            if handle.is_some() {
                self.notify.notify_waiters();
            }
            Ok(handle)
        })
    }

    fn fail<'a>(&'a self, id: JobId, reason: &'a str) -> QueueFuture<'a, ()> {
        let reason = reason.to_owned();
        Box::pin(self.blocking(move |conn| finish_job(conn, id, JobState::Failed, Some(&reason))))
    }

    fn pending(&self) -> QueueFuture<'_, usize> {
        Box::pin(self.blocking(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM backfill_jobs WHERE state IN (?1, ?2)",
                params![JobState::Waiting.as_str(), JobState::Active.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        }))
    }

    fn wakeup(&self) -> Option<Arc<Notify>> {
        Some(self.notify.clone())
    }
}

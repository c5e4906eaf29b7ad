use crate::jobs::queue::JobQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters shared by tip sync, backfill workers, and the page pipeline.
#[derive(Default, Debug)]
pub struct Telemetry {
    pages_fetched: AtomicU64,
    orders_received: AtomicU64,
    malformed_orders: AtomicU64,
    records_inserted: AtomicU64,
    parse_failures: AtomicU64,
    orders_dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    fetch_errors: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_continued: AtomicU64,
    tasks_retried: AtomicU64,
    queue_errors: AtomicU64,
}

impl Telemetry {
    pub fn record_page(&self, received: usize, malformed: usize) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
        self.orders_received
            .fetch_add(received as u64, Ordering::Relaxed);
        if malformed > 0 {
            self.malformed_orders
                .fetch_add(malformed as u64, Ordering::Relaxed);
        }
    }

    pub fn record_inserted(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.records_inserted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_parse_failures(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.parse_failures.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.orders_dispatched
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_continued(&self) {
        self.tasks_continued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_retried(&self) {
        self.tasks_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_error(&self) {
        self.queue_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_inserted(&self) -> u64 {
        self.records_inserted.load(Ordering::Relaxed)
    }

    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            orders_received: self.orders_received.load(Ordering::Relaxed),
            malformed_orders: self.malformed_orders.load(Ordering::Relaxed),
            records_inserted: self.records_inserted.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            orders_dispatched: self.orders_dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_continued: self.tasks_continued.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            queue_errors: self.queue_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub pages_fetched: u64,
    pub orders_received: u64,
    pub malformed_orders: u64,
    pub records_inserted: u64,
    pub parse_failures: u64,
    pub orders_dispatched: u64,
    pub dispatch_failures: u64,
    pub fetch_errors: u64,
    pub tasks_completed: u64,
    pub tasks_continued: u64,
    pub tasks_retried: u64,
    pub queue_errors: u64,
}

/// Spawns a background task that periodically logs ingest rate, queue depth, and error counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    queue: Arc<dyn JobQueue>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "seaport_sync::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let inserted_delta = current
                        .records_inserted
                        .saturating_sub(last_snapshot.records_inserted);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let insert_rate = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        inserted_delta as f64 / elapsed
                    };
                    let pending_jobs = match queue.pending().await {
                        Ok(pending) => pending,
                        Err(err) => {
                            tracing::warn!(target: "seaport_sync::metrics", error = %err, "failed to read job queue depth");
                            0
                        }
                    };

                    tracing::info!(
                        target: "seaport_sync::metrics",
                        insert_rate = format!("{insert_rate:.2}"),
                        pages = current.pages_fetched,
                        received = current.orders_received,
                        inserted = current.records_inserted,
                        parse_failures = current.parse_failures,
                        malformed = current.malformed_orders,
                        dispatched = current.orders_dispatched,
                        dispatch_failures = current.dispatch_failures,
                        fetch_errors = current.fetch_errors,
                        tasks_completed = current.tasks_completed,
                        tasks_retried = current.tasks_retried,
                        queue_errors = current.queue_errors,
                        pending_jobs,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}

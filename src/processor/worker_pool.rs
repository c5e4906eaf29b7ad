//! Pool of backfill workers draining the job queue.
//!
//! Each worker reserves a job, executes it, then acknowledges the job and
//! enqueues the follow-up the outcome calls for in a single queue step. A job
//! that could not be settled stays in flight so the queue can hand it out
//! again after a restart.

use crate::jobs::queue::{JobQueue, ReservedJob};
use crate::jobs::scheduler::BackfillScheduler;
use crate::jobs::task::TaskOutcome;
use crate::jobs::worker::BackfillWorker;
use crate::processor::backoff::sleep_with_cancellation;
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Result};
use futures::FutureExt;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct BackfillPoolParams {
    pub queue: Arc<dyn JobQueue>,
    pub scheduler: BackfillScheduler,
    pub worker: Arc<BackfillWorker>,
    pub telemetry: Arc<Telemetry>,
    pub poll_interval: Duration,
}

struct PoolShared {
    queue: Arc<dyn JobQueue>,
    scheduler: BackfillScheduler,
    worker: Arc<BackfillWorker>,
    telemetry: Arc<Telemetry>,
    poll_interval: Duration,
}

pub struct BackfillPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
    run_token: Option<CancellationToken>,
}

impl BackfillPool {
    pub(crate) fn new(params: BackfillPoolParams) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                queue: params.queue,
                scheduler: params.scheduler,
                worker: params.worker,
                telemetry: params.telemetry,
                poll_interval: params.poll_interval,
            }),
            workers: Vec::new(),
            run_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_token.is_some()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Spawns `worker_count` workers that run until `shutdown` fires or
    /// [`stop`](Self::stop) is called.
    pub fn start(&mut self, worker_count: usize, shutdown: &CancellationToken) -> Result<()> {
        if self.is_running() {
            bail!("backfill pool is already running");
        }
        if worker_count == 0 {
            bail!("worker_count must be greater than 0");
        }

        let run_token = shutdown.child_token();
        for worker_id in 0..worker_count {
            let shared = self.shared.clone();
            let token = run_token.clone();
            let handle = tokio::spawn(async move {
                run_worker(worker_id, shared, token).await;
            });
            self.workers.push(handle);
        }

        tracing::info!(workers = worker_count, "backfill pool started");
        self.run_token = Some(run_token);
        Ok(())
    }

    /// Signals every worker and waits for in-flight jobs to finish.
    pub async fn stop(&mut self) {
        let Some(token) = self.run_token.take() else {
            return;
        };
        token.cancel();

        for (worker_id, handle) in std::mem::take(&mut self.workers).into_iter().enumerate() {
            if let Err(err) = handle.await {
                tracing::warn!(worker = worker_id, error = %err, "backfill worker task failed to join");
            }
        }
        tracing::info!("backfill pool stopped");
    }
}

#[tracing::instrument(name = "backfill_worker", skip_all, fields(worker = worker_id))]
async fn run_worker(worker_id: usize, shared: Arc<PoolShared>, shutdown: CancellationToken) {
    let wakeup = shared.queue.wakeup();

    while !shutdown.is_cancelled() {
        match shared.queue.reserve().await {
            Ok(Some(job)) => shared.handle(job).await,
            Ok(None) => {
                let wakeup = wakeup.clone();
                let notified = async move {
                    match wakeup {
                        Some(notify) => notify.notified().await,
                        None => futures::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = notified => {}
                    _ = tokio::time::sleep(shared.poll_interval) => {}
                }
            }
            Err(err) => {
                shared.telemetry.record_queue_error();
                tracing::error!(error = %err, "failed to reserve backfill job");
                if sleep_with_cancellation(shared.poll_interval, Some(&shutdown))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    tracing::debug!("backfill worker stopped");
}

impl PoolShared {
    async fn handle(&self, job: ReservedJob) {
        let ReservedJob { id, task } = job;

        let outcome = std::panic::AssertUnwindSafe(self.worker.execute(&task))
            .catch_unwind()
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic_payload) => {
                let panic_msg = panic_message(panic_payload.as_ref());
                tracing::error!(job = id, panic = %panic_msg, "backfill task panicked");
                if let Err(err) = self.queue.fail(id, &panic_msg).await {
                    self.telemetry.record_queue_error();
                    tracing::error!(job = id, error = %err, "failed to mark backfill job as failed");
                }
                return;
            }
        };

        match &outcome {
            TaskOutcome::Completed => self.telemetry.record_task_completed(),
            TaskOutcome::Continue { .. } => self.telemetry.record_task_continued(),
            TaskOutcome::RetryWithCursor { .. } => self.telemetry.record_task_retried(),
        }

        if let Err(err) = self.scheduler.settle(id, &task, &outcome).await {
            self.telemetry.record_queue_error();
            tracing::error!(
                job = id,
                error = %err,
                "failed to settle backfill job; leaving it in flight"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

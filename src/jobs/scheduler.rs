use crate::jobs::queue::{EnqueueOptions, FollowUp, JobHandle, JobId, JobQueue};
use crate::jobs::task::{format_timestamp, BackfillTask, TaskOutcome, TimeWindow};
use crate::market::types::{Cursor, Timestamp};
use crate::processor::backoff::requeue_delay;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RETRY_FLOOR: Duration = Duration::from_millis(100);

/// Turns historical ranges into window tasks and task outcomes into
/// follow-up tasks.
#[derive(Clone)]
pub struct BackfillScheduler {
    queue: Arc<dyn JobQueue>,
    retry_initial_delay: Duration,
    retry_max_delay: Duration,
    /// Lower bound on every retry delay, including when `retry_initial_delay`
    /// is zero.
    retry_floor: Duration,
}

impl BackfillScheduler {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            retry_initial_delay: Duration::ZERO,
            retry_max_delay: Duration::from_secs(30),
            retry_floor: DEFAULT_RETRY_FLOOR,
        }
    }

    pub fn with_retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial_delay = initial;
        self.retry_max_delay = max.max(initial);
        self
    }

    pub fn with_retry_floor(mut self, floor: Duration) -> Self {
        self.retry_floor = floor;
        self
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Enqueues one window task per minute step of `[from, to]`.
    pub async fn schedule_range(
        &self,
        from: Timestamp,
        to: Timestamp,
        delay: Duration,
    ) -> Result<Vec<JobHandle>> {
        let mut handles = Vec::new();
        for window in TimeWindow::split(from, to) {
            let handle = self
                .enqueue(Some(window.from), Some(window.to), None, 0, delay)
                .await?;
            handles.push(handle);
        }

        tracing::info!(
            from = %format_timestamp(Some(from)),
            to = %format_timestamp(Some(to)),
            windows = handles.len(),
            "scheduled backfill range"
        );
        Ok(handles)
    }

    pub async fn enqueue(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        cursor: Option<Cursor>,
        priority: i32,
        delay: Duration,
    ) -> Result<JobHandle> {
        self.submit(BackfillTask::new(from, to, cursor, priority), delay)
            .await
    }

    /// The task `outcome` calls for next, if any.
    pub fn follow_up(&self, task: &BackfillTask, outcome: &TaskOutcome) -> Option<FollowUp> {
        match outcome {
            TaskOutcome::Completed => None,
            TaskOutcome::Continue { cursor } => {
                let next = task.continuation(cursor.clone());
                Some(Self::follow_up_after(next, Duration::ZERO))
            }
            TaskOutcome::RetryWithCursor { cursor } => {
                let mut retry = task.retry();
                retry.cursor = cursor.clone();
                let delay = self.retry_delay(retry.attempts_made);
                tracing::debug!(
                    attempts = retry.attempts_made,
                    delay_ms = delay.as_millis() as u64,
                    cursor = ?retry.cursor,
                    "re-queueing backfill task"
                );
                Some(Self::follow_up_after(retry, delay))
            }
        }
    }

    /// Enqueues whatever follow-up `outcome` calls for.
    pub async fn apply(
        &self,
        task: &BackfillTask,
        outcome: &TaskOutcome,
    ) -> Result<Option<JobHandle>> {
        match self.follow_up(task, outcome) {
            Some(next) => self.submit(next.task, next.options.delay).await.map(Some),
            None => Ok(None),
        }
    }

    /// Acknowledges job `id` and enqueues its follow-up in one queue step.
    pub async fn settle(
        &self,
        id: JobId,
        task: &BackfillTask,
        outcome: &TaskOutcome,
    ) -> Result<Option<JobHandle>> {
        let follow_up = self.follow_up(task, outcome);
        self.queue
            .complete_with(id, follow_up)
            .await
            .with_context(|| format!("failed to settle backfill job {id}"))
    }

    fn retry_delay(&self, attempts: u32) -> Duration {
        let initial = self.retry_initial_delay.max(self.retry_floor);
        requeue_delay(attempts, initial, self.retry_max_delay.max(initial))
    }

    fn follow_up_after(task: BackfillTask, delay: Duration) -> FollowUp {
        let options = EnqueueOptions {
            delay,
            priority: task.priority,
        };
        FollowUp { task, options }
    }

    async fn submit(&self, task: BackfillTask, delay: Duration) -> Result<JobHandle> {
        let FollowUp { task, options } = Self::follow_up_after(task, delay);
        self.queue
            .enqueue(task, options)
            .await
            .context("failed to enqueue backfill task")
    }
}

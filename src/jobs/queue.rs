//! Job queue abstraction for backfill tasks plus an in-process implementation.
//!
//! Jobs are served lowest priority value first, then in enqueue order. A
//! reserved job stays in flight until it is completed or failed.

use crate::jobs::task::BackfillTask;
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

pub type JobId = u64;

pub type QueueFuture<'a, T> = BoxFuture<'a, Result<T>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub delay: Duration,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
}

/// Task enqueued in the same step that acknowledges the job it follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUp {
    pub task: BackfillTask,
    pub options: EnqueueOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedJob {
    pub id: JobId,
    pub task: BackfillTask,
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, task: BackfillTask, options: EnqueueOptions) -> QueueFuture<'_, JobHandle>;

    /// Takes the next ready job, if any.
    fn reserve(&self) -> QueueFuture<'_, Option<ReservedJob>>;

    /// Acknowledges a reserved job and enqueues `follow_up` atomically: either
    /// both happen or neither does.
    fn complete_with(
        &self,
        id: JobId,
        follow_up: Option<FollowUp>,
    ) -> QueueFuture<'_, Option<JobHandle>>;

    /// Acknowledges a reserved job.
    fn complete(&self, id: JobId) -> QueueFuture<'_, ()> {
        Box::pin(async move { self.complete_with(id, None).await.map(|_| ()) })
    }

    /// Marks a reserved job as failed. Failed jobs are not retried.
    fn fail<'a>(&'a self, id: JobId, reason: &'a str) -> QueueFuture<'a, ()>;

    /// Jobs waiting or in flight.
    fn pending(&self) -> QueueFuture<'_, usize>;

    /// Signalled on enqueue so idle workers can wake before their poll interval.
    fn wakeup(&self) -> Option<Arc<Notify>> {
        None
    }
}

struct WaitingJob {
    id: JobId,
    task: BackfillTask,
    priority: i32,
    ready_at: Instant,
}

#[derive(Default)]
struct MemoryQueueState {
    next_id: JobId,
    waiting: Vec<WaitingJob>,
    active: HashMap<JobId, BackfillTask>,
    completed: u64,
    failed: u64,
}

#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<MemoryQueueState>,
    notify: Arc<Notify>,
}

impl MemoryQueueState {
    fn push(&mut self, task: BackfillTask, options: EnqueueOptions) -> JobHandle {
        self.next_id += 1;
        let id = self.next_id;
        self.waiting.push(WaitingJob {
            id,
            task,
            priority: options.priority,
            ready_at: Instant::now() + options.delay,
        });
        JobHandle { id }
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks not yet reserved, in serving order, ignoring delays.
    pub fn waiting_tasks(&self) -> Vec<BackfillTask> {
        let state = self.state.lock();
        let mut waiting: Vec<_> = state.waiting.iter().collect();
        waiting.sort_by_key(|job| (job.priority, job.id));
        waiting.into_iter().map(|job| job.task.clone()).collect()
    }

    pub fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    pub fn failed(&self) -> u64 {
        self.state.lock().failed
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue(&self, task: BackfillTask, options: EnqueueOptions) -> QueueFuture<'_, JobHandle> {
        let handle = self.state.lock().push(task, options);
        self.notify.notify_waiters();
        Box::pin(async move { Ok(handle) })
    }

    fn reserve(&self) -> QueueFuture<'_, Option<ReservedJob>> {
        let reserved = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let next = state
                .waiting
                .iter()
                .enumerate()
                .filter(|(_, job)| job.ready_at <= now)
                .min_by_key(|(_, job)| (job.priority, job.id))
                .map(|(idx, _)| idx);

            next.map(|idx| {
                let job = state.waiting.swap_remove(idx);
                state.active.insert(job.id, job.task.clone());
                ReservedJob {
                    id: job.id,
                    task: job.task,
                }
            })
        };
        Box::pin(async move { Ok(reserved) })
    }

    fn complete_with(
        &self,
        id: JobId,
        follow_up: Option<FollowUp>,
    ) -> QueueFuture<'_, Option<JobHandle>> {
        let result = {
            let mut state = self.state.lock();
            if state.active.remove(&id).is_some() {
                state.completed += 1;
                Ok(follow_up.map(|next| state.push(next.task, next.options)))
            } else {
                Err(id)
            }
        };
        if matches!(result, Ok(Some(_))) {
            self.notify.notify_waiters();
        }
        Box::pin(async move {
            match result {
                Ok(handle) => Ok(handle),
                Err(id) => bail!("job {id} is not in flight"),
            }
        })
    }

    fn fail<'a>(&'a self, id: JobId, reason: &'a str) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if state.active.remove(&id).is_none() {
                bail!("job {id} is not in flight");
            }
            state.failed += 1;
            tracing::warn!(job = id, reason, "backfill job failed");
            Ok(())
        })
    }

    fn pending(&self) -> QueueFuture<'_, usize> {
        let pending = {
            let state = self.state.lock();
            state.waiting.len() + state.active.len()
        };
        Box::pin(async move { Ok(pending) })
    }

    fn wakeup(&self) -> Option<Arc<Notify>> {
        Some(self.notify.clone())
    }
}

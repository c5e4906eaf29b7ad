//! Backfill jobs: window tasks, queues, scheduling, and single-page execution.

pub mod queue;
pub mod scheduler;
pub mod sqlite_queue;
pub mod task;
pub mod worker;

pub use queue::{
    EnqueueOptions, FollowUp, JobHandle, JobId, JobQueue, MemoryJobQueue, ReservedJob,
};
pub use scheduler::BackfillScheduler;
pub use sqlite_queue::{QueueCounts, SqliteJobQueue};
pub use task::{BackfillTask, TaskOutcome, TimeWindow, WINDOW_STEP_SECS};
pub use worker::BackfillWorker;

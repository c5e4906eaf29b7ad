//! Processor orchestration covering the sync engine, tip sync, lifecycle
//! management, and the backfill worker pool.

pub mod backoff;
pub mod engine;
pub mod lifecycle;
pub mod tip;
pub mod worker_pool;

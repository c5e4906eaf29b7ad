pub mod jobs;
pub mod market;
pub mod orders;
pub mod processor;
pub mod runtime;
pub mod store;

pub use jobs::{
    BackfillScheduler, BackfillTask, BackfillWorker, JobQueue, MemoryJobQueue, SqliteJobQueue,
    TaskOutcome, TimeWindow,
};
pub use market::{MarketClient, MarketError, OrderPage, OrderSource, PageQuery, RawOrder};
pub use orders::{PagePipeline, PersistableRecord, SeaportParser};
pub use processor::engine::{SyncCollaborators, SyncEngine};
pub use processor::tip::{TipSync, TipSyncReport};
pub use processor::worker_pool::BackfillPool;
pub use runtime::config::{SyncConfig, SyncConfigBuilder, SyncConfigParams};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use store::{ChannelRelay, Dispatcher, Persister, RelayBatch, SqlitePersister};

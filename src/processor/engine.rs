//! `SyncEngine` wires the marketplace source, page pipeline, job queue, and
//! background tasks into one start/stop unit.

use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::tip::{TipSync, TipSyncReport};
use super::worker_pool::{BackfillPool, BackfillPoolParams};
use crate::jobs::queue::{JobHandle, JobQueue};
use crate::jobs::scheduler::BackfillScheduler;
use crate::jobs::sqlite_queue::SqliteJobQueue;
use crate::jobs::worker::BackfillWorker;
use crate::market::client::{MarketClient, OrderSource};
use crate::market::types::{Cursor, Timestamp};
use crate::orders::limiter::ConcurrencyLimiter;
use crate::orders::page::{PagePipeline, PageProcessor};
use crate::orders::parser::{OrderParser, SeaportParser};
use crate::runtime::config::SyncConfig;
use crate::runtime::telemetry::Telemetry;
use crate::store::dispatcher::{ChannelRelay, Dispatcher, RelayBatch, RelaySink};
use crate::store::persister::{Persister, SqlitePersister};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RELAY_CHANNEL_CAPACITY: usize = 64;

/// External collaborators the engine drives.
pub struct SyncCollaborators {
    pub source: Arc<dyn OrderSource>,
    pub parser: Arc<dyn OrderParser>,
    pub persister: Arc<dyn Persister>,
    pub relay: Arc<dyn RelaySink>,
    pub queue: Arc<dyn JobQueue>,
}

pub struct SyncEngine {
    config: SyncConfig,
    telemetry: Arc<Telemetry>,
    queue: Arc<dyn JobQueue>,
    scheduler: BackfillScheduler,
    tip: Arc<TipSync>,
    pool: BackfillPool,
    lifecycle: Option<LifecycleHandles>,
    shutdown_root: CancellationToken,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, collaborators: SyncCollaborators) -> Self {
        Self::with_cancellation_token(config, collaborators, CancellationToken::new())
    }

    pub fn with_cancellation_token(
        config: SyncConfig,
        collaborators: SyncCollaborators,
        shutdown_token: CancellationToken,
    ) -> Self {
        let SyncCollaborators {
            source,
            parser,
            persister,
            relay,
            queue,
        } = collaborators;

        let telemetry = Arc::new(Telemetry::default());
        let pipeline = Arc::new(PagePipeline::new(
            PageProcessor::new(parser, ConcurrencyLimiter::new(config.parse_concurrency())),
            persister,
            Dispatcher::new(relay, telemetry.clone()),
            telemetry.clone(),
        ));
        let scheduler = BackfillScheduler::new(queue.clone())
            .with_retry_delays(config.retry_initial_delay(), config.retry_max_delay())
            .with_retry_floor(config.queue_poll_interval());
        let tip = Arc::new(TipSync::new(
            source.clone(),
            pipeline.clone(),
            config.page_size(),
            telemetry.clone(),
        ));
        let worker = Arc::new(BackfillWorker::new(
            source,
            pipeline,
            config.page_size(),
            telemetry.clone(),
        ));
        let pool = BackfillPool::new(BackfillPoolParams {
            queue: queue.clone(),
            scheduler: scheduler.clone(),
            worker,
            telemetry: telemetry.clone(),
            poll_interval: config.queue_poll_interval(),
        });

        Self {
            config,
            telemetry,
            queue,
            scheduler,
            tip,
            pool,
            lifecycle: None,
            shutdown_root: shutdown_token,
        }
    }

    /// Builds an engine backed by the marketplace API and a SQLite file for
    /// both orders and jobs. Relay batches arrive on the returned receiver.
    pub fn open(config: SyncConfig) -> Result<(Self, mpsc::Receiver<RelayBatch>)> {
        let source = Arc::new(MarketClient::from_config(&config)?);
        let persister = Arc::new(SqlitePersister::open(config.database_path())?);
        let queue = Arc::new(SqliteJobQueue::open(config.database_path())?);
        let (relay, relay_rx) = ChannelRelay::channel(RELAY_CHANNEL_CAPACITY);

        let engine = Self::new(
            config,
            SyncCollaborators {
                source,
                parser: Arc::new(SeaportParser),
                persister,
                relay: Arc::new(relay),
                queue,
            },
        );
        Ok((engine, relay_rx))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &BackfillScheduler {
        &self.scheduler
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_some()
    }

    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        if self.is_running() {
            tracing::warn!("replacing shutdown token while the engine is running");
        }
        self.shutdown_root = shutdown;
    }

    /// Enqueues window tasks covering `[from, to]`.
    pub async fn schedule_range(
        &self,
        from: Timestamp,
        to: Timestamp,
        delay: Duration,
    ) -> Result<Vec<JobHandle>> {
        self.scheduler.schedule_range(from, to, delay).await
    }

    pub async fn enqueue_task(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        cursor: Option<Cursor>,
        priority: i32,
        delay: Duration,
    ) -> Result<JobHandle> {
        self.scheduler
            .enqueue(from, to, cursor, priority, delay)
            .await
    }

    /// Runs a single tip sync pass.
    pub async fn run_tip_sync(&self) -> Result<TipSyncReport> {
        self.tip.run().await
    }

    /// Starts the backfill pool, the periodic tip sync loop, and the metrics
    /// reporter as enabled by the configuration.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let tip = self
            .config
            .tip_sync_enabled()
            .then(|| (self.tip.clone(), self.config.tip_interval()));
        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &self.shutdown_root,
            telemetry: self.telemetry.clone(),
            queue: self.queue.clone(),
            metrics_interval: self.config.metrics_interval(),
            tip,
        });

        if self.config.backfill_enabled() {
            if let Err(err) = self
                .pool
                .start(self.config.backfill_workers(), &lifecycle.run_token)
            {
                lifecycle.shutdown().await;
                return Err(err);
            }
        }

        tracing::info!(
            tip_sync = self.config.tip_sync_enabled(),
            backfill_workers = if self.config.backfill_enabled() {
                self.config.backfill_workers()
            } else {
                0
            },
            "sync engine started"
        );
        self.lifecycle = Some(lifecycle);
        Ok(())
    }

    /// Stops background tasks, letting in-flight backfill jobs finish.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(lifecycle) = self.lifecycle.take() else {
            return Ok(());
        };

        self.pool.stop().await;
        lifecycle.shutdown().await;
        tracing::info!("sync engine stopped");
        Ok(())
    }
}

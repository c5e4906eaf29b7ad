use crate::{SyncCollaborators, SyncConfig, SyncEngine};
use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates the sync engine lifecycle and handles OS signals for graceful shutdowns.
pub struct Runner {
    engine: SyncEngine,
    shutdown: CancellationToken,
    started: bool,
}

impl Runner {
    /// Creates a new runner and wires a root [`CancellationToken`] that propagates
    /// through the engine (backfill workers, tip sync loop, metrics reporter).
    pub fn new(config: SyncConfig, collaborators: SyncCollaborators) -> Self {
        let shutdown = CancellationToken::new();
        let engine = SyncEngine::with_cancellation_token(config, collaborators, shutdown.clone());
        Self::from_parts(engine, shutdown)
    }

    /// Wraps an engine built elsewhere, e.g. by [`SyncEngine::open`].
    pub fn with_engine(mut engine: SyncEngine) -> Self {
        let shutdown = CancellationToken::new();
        engine.replace_shutdown_root(shutdown.clone());
        Self::from_parts(engine, shutdown)
    }

    fn from_parts(engine: SyncEngine, shutdown: CancellationToken) -> Self {
        Self {
            engine,
            shutdown,
            started: false,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.engine.start().await?;
        self.started = true;
        Ok(())
    }

    /// Stops the engine by cancelling the root token and waiting for its tasks.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        self.engine.stop().await?;
        self.started = false;
        self.reinitialize_shutdown_token();
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.engine.replace_shutdown_root(self.shutdown.clone());
    }
}

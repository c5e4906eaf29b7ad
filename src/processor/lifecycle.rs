//! Background tasks that live for one `SyncEngine` run.

use super::tip::TipSync;
use crate::jobs::queue::JobQueue;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    metrics_handle: Option<JoinHandle<()>>,
    tip_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub queue: Arc<dyn JobQueue>,
    pub metrics_interval: Duration,
    /// `None` disables the periodic tip sync loop.
    pub tip: Option<(Arc<TipSync>, Duration)>,
}

impl LifecycleHandles {
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let LifecycleSpawnParams {
            shutdown_root,
            telemetry,
            queue,
            metrics_interval,
            tip,
        } = params;

        let run_token = shutdown_root.child_token();
        let metrics_handle = spawn_metrics_reporter(
            telemetry,
            queue,
            run_token.clone(),
            metrics_interval,
        );
        let tip_handle = tip.map(|(tip, period)| tip.spawn_loop(period, run_token.clone()));

        Self {
            run_token,
            metrics_handle: Some(metrics_handle),
            tip_handle,
        }
    }

    pub(crate) async fn shutdown(mut self) {
        self.run_token.cancel();

        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }

        if let Some(handle) = self.tip_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "tip sync task panicked");
            }
        }
    }
}

use std::{sync::Arc, time::Duration};

use crate::support::{
    helpers::{init_tracing, listings, test_config, wait_for_records, wiring},
    mock_market::{MockMarket, MockMarketServer},
};
use anyhow::Result;
use seaport_sync::{MemoryJobQueue, Runner, SyncConfig};
use tempfile::TempDir;
use tokio::time::timeout;

const NOW: i64 = 1_700_000_000;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_runs_tip_loop_until_cancelled() -> Result<()> {
    init_tracing();
    let market = MockMarket::new();
    market.set_page((None, None), listings("f", 3, NOW), None);
    let server = MockMarketServer::start(market.clone()).await?;

    let dir = TempDir::new()?;
    let base = test_config(server.url(), &dir.path().join("sync.sqlite3"))?;
    let config = SyncConfig::builder()
        .api_url(base.api_url())
        .database_path(base.database_path())
        .queue_poll_interval(Duration::from_millis(20))
        .tip_interval(Duration::from_millis(50))
        .tip_sync_enabled(true)
        .build()?;
    let wiring = wiring(&config, Arc::new(MemoryJobQueue::new()))?;
    let mut runner = Runner::new(config, wiring.collaborators);

    let token = runner.cancellation_token();
    let store = wiring.store.clone();
    let canceller = tokio::spawn(async move {
        let reached = wait_for_records(&store, 3, Duration::from_secs(5)).await;
        token.cancel();
        reached
    });

    timeout(Duration::from_secs(10), runner.run_until_ctrl_c()).await??;
    canceller.await??;

    assert!(!runner.engine().is_running());
    assert!(market.requests().len() >= 2, "tip loop should have polled the feed");

    // Restartable after a stop.
    runner.start().await?;
    assert!(runner.engine().is_running());
    runner.stop().await?;
    assert!(!runner.engine().is_running());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn config_rejects_zero_backfill_workers() {
    let err = SyncConfig::builder()
        .backfill_workers(0)
        .build()
        .expect_err("zero workers must be rejected");
    assert!(err.to_string().contains("backfill_workers"));
}

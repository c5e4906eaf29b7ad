use std::{sync::Arc, time::Duration};

use crate::support::{
    helpers::{init_tracing, listings, test_config, wait_for_drained_queue, wait_for_records, wiring},
    mock_market::{MockMarket, MockMarketServer},
};
use anyhow::Result;
use seaport_sync::jobs::QueueCounts;
use seaport_sync::{BackfillScheduler, JobQueue, SqliteJobQueue, SyncEngine};
use tempfile::TempDir;

const T0: i64 = 1_677_672_000;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_jobs_resume_after_reopening_the_queue() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let queue_path = dir.path().join("jobs.sqlite3");

    {
        let queue = SqliteJobQueue::open(&queue_path)?;
        let scheduler = BackfillScheduler::new(Arc::new(queue.clone()));
        scheduler.schedule_range(T0, T0 + 60, Duration::ZERO).await?;

        // The process dies while the first window is in flight.
        let reserved = queue.reserve().await?;
        assert!(reserved.is_some());
        assert_eq!(queue.counts()?.active, 1);
    }

    let reopened = SqliteJobQueue::open(&queue_path)?;
    assert_eq!(
        reopened.counts()?,
        QueueCounts {
            waiting: 2,
            active: 0,
            completed: 0,
            failed: 0,
        }
    );

    let market = MockMarket::new();
    market.set_page((Some(T0 - 1), None), listings("a", 2, T0), None);
    market.set_page((Some(T0 + 59), None), listings("b", 2, T0 + 60), None);
    let server = MockMarketServer::start(market.clone()).await?;

    let config = test_config(server.url(), &dir.path().join("orders.sqlite3"))?;
    let queue: Arc<dyn JobQueue> = Arc::new(reopened.clone());
    let wiring = wiring(&config, queue.clone())?;
    let mut engine = SyncEngine::new(config, wiring.collaborators);
    engine.start().await?;

    wait_for_records(&wiring.store, 4, Duration::from_secs(10)).await?;
    wait_for_drained_queue(&queue, Duration::from_secs(10)).await?;
    engine.stop().await?;

    let counts = reopened.counts()?;
    assert_eq!(counts.completed, 2);
    assert_eq!(counts.waiting + counts.active, 0);

    server.shutdown().await;
    Ok(())
}

use std::{sync::Arc, time::Duration};

use crate::support::{
    helpers::{
        drain_relay, init_tracing, listings, test_config, wait_for_drained_queue,
        wait_for_records, wire_listing, wiring,
    },
    mock_market::{MockMarket, MockMarketServer},
};
use anyhow::Result;
use seaport_sync::{JobQueue, MemoryJobQueue, SyncEngine};
use tempfile::TempDir;

const T0: i64 = 1_677_672_000;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn range_is_split_into_overlapping_windows_and_drained() -> Result<()> {
    init_tracing();
    let market = MockMarket::new();
    market.set_page((Some(T0 - 1), None), listings("a", 3, T0 + 10), Some("w1p2"));
    market.set_page((Some(T0 - 1), Some("w1p2".into())), listings("b", 2, T0 + 5), None);
    market.set_page((Some(T0 + 59), None), listings("c", 1, T0 + 70), None);
    let server = MockMarketServer::start(market.clone()).await?;

    let dir = TempDir::new()?;
    let config = test_config(server.url(), &dir.path().join("sync.sqlite3"))?;
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
    let mut wiring = wiring(&config, queue.clone())?;
    let mut engine = SyncEngine::new(config, wiring.collaborators);

    let handles = engine.schedule_range(T0, T0 + 180, Duration::ZERO).await?;
    assert_eq!(handles.len(), 4);

    engine.start().await?;
    wait_for_records(&wiring.store, 6, DRAIN_TIMEOUT).await?;
    wait_for_drained_queue(&queue, DRAIN_TIMEOUT).await?;
    engine.stop().await?;

    for step in 0..4 {
        let after = T0 + step * 60 - 1;
        let requests = market.requests_for(Some(after));
        assert!(!requests.is_empty(), "window starting at {after} was never fetched");
        assert!(requests.iter().all(|r| r.listed_before == Some(after + 62)));
        assert!(requests.iter().all(|r| r.limit == Some(50)));
    }

    let first_window: Vec<_> = market
        .requests_for(Some(T0 - 1))
        .into_iter()
        .map(|r| r.cursor)
        .collect();
    assert_eq!(first_window, vec![None, Some("w1p2".to_owned())]);

    let batches = drain_relay(&mut wiring.relay_rx);
    assert!(batches.iter().all(|batch| batch.prioritized));
    let relayed: usize = batches.iter().map(|batch| batch.items.len()).sum();
    assert_eq!(relayed, 6);

    let stats = engine.telemetry().snapshot();
    assert_eq!(stats.records_inserted, 6);
    assert_eq!(stats.tasks_completed, 4);
    assert_eq!(stats.tasks_continued, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_page_retries_from_its_own_cursor() -> Result<()> {
    init_tracing();
    let market = MockMarket::new();
    market.set_page((Some(T0 - 1), None), listings("a", 2, T0 + 1), Some("x"));
    market.set_page((Some(T0 - 1), Some("x".into())), listings("b", 1, T0), None);
    market.fail_page((Some(T0 - 1), Some("x".into())), 503, 2);
    let server = MockMarketServer::start(market.clone()).await?;

    let dir = TempDir::new()?;
    let config = test_config(server.url(), &dir.path().join("sync.sqlite3"))?;
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
    let wiring = wiring(&config, queue.clone())?;
    let mut engine = SyncEngine::new(config, wiring.collaborators);

    engine.schedule_range(T0, T0, Duration::ZERO).await?;
    engine.start().await?;
    wait_for_records(&wiring.store, 3, DRAIN_TIMEOUT).await?;
    wait_for_drained_queue(&queue, DRAIN_TIMEOUT).await?;
    engine.stop().await?;

    let cursors: Vec<_> = market
        .requests_for(Some(T0 - 1))
        .into_iter()
        .map(|r| r.cursor)
        .collect();
    let x = Some("x".to_owned());
    assert_eq!(cursors, vec![None, x.clone(), x.clone(), x]);

    let stats = engine.telemetry().snapshot();
    assert_eq!(stats.fetch_errors, 2);
    assert_eq!(stats.tasks_retried, 2);
    assert_eq!(stats.tasks_completed, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rerunning_a_range_inserts_nothing_new() -> Result<()> {
    init_tracing();
    let market = MockMarket::new();
    market.set_page(
        (Some(999), None),
        vec![wire_listing("0x01", 1000), wire_listing("0x02", 1059)],
        None,
    );
    market.set_page(
        (Some(1059), None),
        vec![wire_listing("0x02", 1059), wire_listing("0x03", 1100)],
        None,
    );
    let server = MockMarketServer::start(market.clone()).await?;

    let dir = TempDir::new()?;
    let config = test_config(server.url(), &dir.path().join("sync.sqlite3"))?;
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
    let wiring = wiring(&config, queue.clone())?;
    let mut engine = SyncEngine::new(config, wiring.collaborators);
    engine.start().await?;

    for _ in 0..2 {
        let handles = engine.schedule_range(1000, 1120, Duration::ZERO).await?;
        assert_eq!(handles.len(), 3);
        wait_for_drained_queue(&queue, DRAIN_TIMEOUT).await?;
    }
    engine.stop().await?;

    assert_eq!(wiring.store.count()?, 3);
    assert_eq!(engine.telemetry().records_inserted(), 3);
    assert_eq!(market.requests_for(Some(999)).len(), 2);
    assert_eq!(market.requests_for(Some(1059)).len(), 2);
    assert_eq!(market.requests_for(Some(1119)).len(), 2);

    server.shutdown().await;
    Ok(())
}

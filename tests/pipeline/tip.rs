use std::sync::Arc;

use crate::support::{
    helpers::{drain_relay, init_tracing, test_config, wire_listing, wiring},
    mock_market::{MockMarket, MockMarketServer},
};
use anyhow::Result;
use seaport_sync::orders::OrderKind;
use seaport_sync::{MemoryJobQueue, SyncEngine};
use tempfile::TempDir;

const NOW: i64 = 1_700_000_000;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tip_sync_stops_on_page_with_only_known_listings() -> Result<()> {
    init_tracing();
    let market = MockMarket::new();
    market.set_page(
        (None, None),
        vec![wire_listing("0x0a", NOW), wire_listing("0x09", NOW - 5)],
        Some("t2"),
    );
    market.set_page((None, Some("t2".into())), vec![wire_listing("0x08", NOW - 9)], Some("t3"));
    market.set_page((None, Some("t3".into())), vec![wire_listing("0x08", NOW - 9)], Some("t4"));
    let server = MockMarketServer::start(market.clone()).await?;

    let dir = TempDir::new()?;
    let config = test_config(server.url(), &dir.path().join("sync.sqlite3"))?;
    let mut wiring = wiring(&config, Arc::new(MemoryJobQueue::new()))?;
    let engine = SyncEngine::new(config, wiring.collaborators);

    let report = engine.run_tip_sync().await?;
    assert_eq!(report.pages, 3);
    assert_eq!(report.inserted, 3);
    assert_eq!(wiring.store.count()?, 3);

    let requests = market.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests
        .iter()
        .all(|r| r.listed_after.is_none() && r.listed_before.is_none()));
    let cursors: Vec<_> = requests.into_iter().map(|r| r.cursor).collect();
    assert_eq!(cursors, vec![None, Some("t2".to_owned()), Some("t3".to_owned())]);

    let batches = drain_relay(&mut wiring.relay_rx);
    assert!(!batches.is_empty());
    assert!(batches.iter().all(|batch| batch.prioritized));
    assert!(batches
        .iter()
        .flat_map(|batch| batch.items.iter())
        .all(|item| item.kind == OrderKind::Seaport));

    let second = engine.run_tip_sync().await?;
    assert_eq!(second.pages, 1);
    assert_eq!(second.inserted, 0);
    assert_eq!(wiring.store.count()?, 3);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reordered_feed_with_new_listing_keeps_paging() -> Result<()> {
    init_tracing();
    let market = MockMarket::new();
    market.set_page(
        (None, None),
        vec![wire_listing("0x02", NOW), wire_listing("0x01", NOW - 1)],
        None,
    );
    let server = MockMarketServer::start(market.clone()).await?;

    let dir = TempDir::new()?;
    let config = test_config(server.url(), &dir.path().join("sync.sqlite3"))?;
    let wiring = wiring(&config, Arc::new(MemoryJobQueue::new()))?;
    let engine = SyncEngine::new(config, wiring.collaborators);

    let first = engine.run_tip_sync().await?;
    assert_eq!(first.inserted, 2);
    assert_eq!(first.pages, 2, "exhausted feed restarts from the newest page");

    // A late listing shows up between already-known ones.
    market.set_page(
        (None, None),
        vec![
            wire_listing("0x02", NOW),
            wire_listing("0x04", NOW - 1),
            wire_listing("0x01", NOW - 1),
        ],
        Some("older"),
    );
    market.set_page((None, Some("older".into())), vec![wire_listing("0x01", NOW - 1)], None);

    let second = engine.run_tip_sync().await?;
    assert_eq!(second.pages, 2);
    assert_eq!(second.inserted, 1);
    assert_eq!(wiring.store.count()?, 3);
    assert!(wiring.store.get("0x04")?.is_some());

    server.shutdown().await;
    Ok(())
}

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use seaport_sync::{
    ChannelRelay, JobQueue, MarketClient, RelayBatch, SeaportParser, SqlitePersister,
    SyncCollaborators, SyncConfig,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

pub const MAKER: &str = "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd";
pub const COLLECTION: &str = "0x1111111111111111111111111111111111111111";
pub const NATIVE: &str = "0x0000000000000000000000000000000000000000";

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// A listing as the marketplace API returns it.
pub fn wire_listing(hash: &str, created_at: i64) -> Value {
    let created = Utc
        .timestamp_opt(created_at, 0)
        .single()
        .expect("valid timestamp")
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string();

    json!({
        "order_hash": hash,
        "created_date": created,
        "maker": { "address": MAKER },
        "protocol_data": {
            "parameters": {
                "offerer": MAKER,
                "zone": NATIVE,
                "offer": [{
                    "itemType": 2,
                    "token": COLLECTION,
                    "identifierOrCriteria": "7",
                    "startAmount": "1",
                    "endAmount": "1"
                }],
                "consideration": [{
                    "itemType": 0,
                    "token": NATIVE,
                    "identifierOrCriteria": "0",
                    "startAmount": "975000000000000000",
                    "endAmount": "975000000000000000",
                    "recipient": MAKER
                }],
                "orderType": 0,
                "startTime": created_at.to_string(),
                "endTime": (created_at + 86_400).to_string(),
                "zoneHash": "0x0000000000000000000000000000000000000000000000000000000000000000",
                "salt": "12345",
                "conduitKey": "0x0000007b02230091a7ed01230072f7006a004d60a8d4e71d599b8104250f0000",
                "totalOriginalConsiderationItems": 1,
                "counter": 0
            },
            "signature": "0xsig"
        }
    })
}

pub fn listings(prefix: &str, count: usize, created_at: i64) -> Vec<Value> {
    (0..count)
        .map(|n| wire_listing(&format!("0x{prefix}{n:04x}"), created_at))
        .collect()
}

pub fn test_config(api_url: &str, database: &Path) -> Result<SyncConfig> {
    SyncConfig::builder()
        .api_url(api_url)
        .chain("ethereum")
        .database_path(database)
        .backfill_workers(2)
        .queue_poll_interval(Duration::from_millis(20))
        .metrics_interval(Duration::from_millis(200))
        .retry_initial_delay(Duration::from_millis(10))
        .retry_max_delay(Duration::from_millis(50))
        .tip_sync_enabled(false)
        .build()
}

pub struct Wiring {
    pub collaborators: SyncCollaborators,
    pub store: SqlitePersister,
    pub relay_rx: mpsc::Receiver<RelayBatch>,
}

/// Collaborators talking to a live (mock) API, an in-memory order table, and
/// the given job queue.
pub fn wiring(config: &SyncConfig, queue: Arc<dyn JobQueue>) -> Result<Wiring> {
    let store = SqlitePersister::open_in_memory()?;
    let (relay, relay_rx) = ChannelRelay::channel(1024);
    let collaborators = SyncCollaborators {
        source: Arc::new(MarketClient::from_config(config)?),
        parser: Arc::new(SeaportParser),
        persister: Arc::new(store.clone()),
        relay: Arc::new(relay),
        queue,
    };
    Ok(Wiring {
        collaborators,
        store,
        relay_rx,
    })
}

pub async fn wait_for_records(store: &SqlitePersister, target: usize, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = store.count()?;
        if current >= target {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("store did not reach {target} records within {timeout:?} (have {current})");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_drained_queue(queue: &Arc<dyn JobQueue>, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        let pending = queue.pending().await?;
        if pending == 0 {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("job queue still had {pending} pending jobs after {timeout:?}");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub fn drain_relay(rx: &mut mpsc::Receiver<RelayBatch>) -> Vec<RelayBatch> {
    let mut batches = Vec::new();
    while let Ok(batch) = rx.try_recv() {
        batches.push(batch);
    }
    batches
}

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use chrono::Utc;
use seaport_sync::{Runner, SyncConfig, SyncEngine, TelemetrySnapshot};

const DEFAULT_LOOKBACK_SECS: i64 = 3_600;
const DEFAULT_LOG_DIRECTIVE: &str = "info";

/// Backfills `[SEAPORT_BACKFILL_FROM, SEAPORT_BACKFILL_TO]` (unix seconds,
/// defaulting to the last hour) while following the tip, until Ctrl-C.
#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let args = ExampleArgs::from_env()?;
    let config = SyncConfig::builder().with_env()?.build()?;
    println!(
        "Backfilling {} -> {} from {} into {}",
        args.from,
        args.to,
        config.api_url(),
        config.database_path().display()
    );

    let (engine, mut relay_rx) = SyncEngine::open(config)?;
    let windows = engine
        .schedule_range(args.from, args.to, Duration::ZERO)
        .await?;
    println!("Scheduled {} backfill windows", windows.len());

    let relayed = Arc::new(AtomicUsize::new(0));
    let relay_counter = relayed.clone();
    let relay_handle = tokio::spawn(async move {
        while let Some(batch) = relay_rx.recv().await {
            relay_counter.fetch_add(batch.items.len(), Ordering::Relaxed);
        }
    });

    let telemetry = engine.telemetry();
    let started = Instant::now();
    let mut runner = Runner::with_engine(engine);
    let run_result = runner.run_until_ctrl_c().await;
    relay_handle.abort();

    print_summary(
        &telemetry.snapshot(),
        relayed.load(Ordering::Relaxed),
        started.elapsed(),
    );
    run_result
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    seaport_sync::init_tracing();
}

fn print_summary(stats: &TelemetrySnapshot, relayed: usize, elapsed: Duration) {
    let seconds = elapsed.as_secs_f64();
    let rate = if seconds > 0.0 {
        stats.records_inserted as f64 / seconds
    } else {
        0.0
    };

    println!(
        "Fetched {} pages, stored {} new listings, relayed {} orders in {:.2}s [{:.2} listings/s]",
        stats.pages_fetched, stats.records_inserted, relayed, seconds, rate
    );
    println!(
        "Windows: {} completed, {} continued, {} retried ({} fetch errors)",
        stats.tasks_completed, stats.tasks_continued, stats.tasks_retried, stats.fetch_errors
    );
}

struct ExampleArgs {
    from: i64,
    to: i64,
}

impl ExampleArgs {
    fn from_env() -> Result<Self> {
        let now = Utc::now().timestamp();
        let to = parse_env_with_default("SEAPORT_BACKFILL_TO", now)?;
        let from = parse_env_with_default("SEAPORT_BACKFILL_FROM", to - DEFAULT_LOOKBACK_SECS)?;
        ensure!(
            from <= to,
            "SEAPORT_BACKFILL_FROM must not be after SEAPORT_BACKFILL_TO"
        );
        Ok(Self { from, to })
    }
}

fn parse_env_with_default(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a unix timestamp, got {value:?}")),
        Err(_) => Ok(default),
    }
}

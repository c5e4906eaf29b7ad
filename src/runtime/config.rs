use crate::market::types::MAX_PAGE_SIZE;
use crate::orders::limiter::DEFAULT_PARSE_CONCURRENCY;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.opensea.io";
pub const DEFAULT_CHAIN: &str = "ethereum";
const DEFAULT_BACKFILL_WORKERS: usize = 2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;
const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_TIP_INTERVAL_SECS: u64 = 60;
const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 30;
const DEFAULT_DATABASE_PATH: &str = "seaport-sync.sqlite3";

/// Runtime configuration for the sync engine.
///
/// All instances must be constructed via [`SyncConfig::builder`] or [`SyncConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    api_url: String,
    chain: String,
    api_key: Option<String>,
    database_path: PathBuf,
    page_size: usize,
    parse_concurrency: usize,
    backfill_workers: usize,
    request_timeout: Duration,
    queue_poll_interval: Duration,
    tip_interval: Duration,
    metrics_interval: Duration,
    retry_initial_delay: Duration,
    retry_max_delay: Duration,
    tip_sync_enabled: bool,
    backfill_enabled: bool,
}

pub struct SyncConfigParams {
    pub api_url: String,
    pub chain: String,
    pub api_key: Option<String>,
    pub database_path: PathBuf,
    pub page_size: usize,
    pub parse_concurrency: usize,
    pub backfill_workers: usize,
    pub request_timeout: Duration,
    pub queue_poll_interval: Duration,
    pub tip_interval: Duration,
    pub metrics_interval: Duration,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub tip_sync_enabled: bool,
    pub backfill_enabled: bool,
}

impl SyncConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: SyncConfigParams) -> Result<Self> {
        let SyncConfigParams {
            api_url,
            chain,
            api_key,
            database_path,
            page_size,
            parse_concurrency,
            backfill_workers,
            request_timeout,
            queue_poll_interval,
            tip_interval,
            metrics_interval,
            retry_initial_delay,
            retry_max_delay,
            tip_sync_enabled,
            backfill_enabled,
        } = params;

        let config = Self {
            api_url: trimmed_string(api_url),
            chain: trimmed_string(chain),
            api_key: api_key.map(trimmed_string).filter(|key| !key.is_empty()),
            database_path,
            page_size,
            parse_concurrency,
            backfill_workers,
            request_timeout,
            queue_poll_interval,
            tip_interval,
            metrics_interval,
            retry_initial_delay,
            retry_max_delay,
            tip_sync_enabled,
            backfill_enabled,
        };

        config.validate()?;
        Ok(config)
    }

    /// Marketplace base URL (including scheme).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Chain segment of the listings path, e.g. `ethereum`.
    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// SQLite file holding both the order store and the job queue.
    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Maximum orders parsed concurrently within one page.
    pub fn parse_concurrency(&self) -> usize {
        self.parse_concurrency
    }

    pub fn backfill_workers(&self) -> usize {
        self.backfill_workers
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// How long an idle backfill worker waits before polling the queue again.
    pub fn queue_poll_interval(&self) -> Duration {
        self.queue_poll_interval
    }

    /// Period between tip sync passes.
    pub fn tip_interval(&self) -> Duration {
        self.tip_interval
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Delay before the first re-run of a failed backfill task.
    pub fn retry_initial_delay(&self) -> Duration {
        self.retry_initial_delay
    }

    pub fn retry_max_delay(&self) -> Duration {
        self.retry_max_delay
    }

    pub fn tip_sync_enabled(&self) -> bool {
        self.tip_sync_enabled
    }

    pub fn backfill_enabled(&self) -> bool {
        self.backfill_enabled
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.api_url)?;
        ensure_not_empty(&self.chain, "chain")?;

        if self.database_path.as_os_str().is_empty() {
            bail!("database_path cannot be empty");
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            bail!("page_size must be between 1 and {MAX_PAGE_SIZE}");
        }

        if self.parse_concurrency == 0 {
            bail!("parse_concurrency must be greater than 0");
        }

        if self.backfill_workers == 0 {
            bail!("backfill_workers must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.queue_poll_interval.is_zero() {
            bail!("queue_poll_interval must be greater than 0");
        }

        if self.tip_interval.is_zero() {
            bail!("tip_interval must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.retry_max_delay < self.retry_initial_delay {
            bail!("retry_max_delay must be at least retry_initial_delay");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct SyncConfigBuilder {
    api_url: Option<String>,
    chain: Option<String>,
    api_key: Option<String>,
    database_path: Option<PathBuf>,
    page_size: Option<usize>,
    parse_concurrency: Option<usize>,
    backfill_workers: Option<usize>,
    request_timeout: Option<Duration>,
    queue_poll_interval: Option<Duration>,
    tip_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    retry_initial_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,
    tip_sync_enabled: Option<bool>,
    backfill_enabled: Option<bool>,
}

impl SyncConfigBuilder {
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = Some(chain.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn parse_concurrency(mut self, limit: usize) -> Self {
        self.parse_concurrency = Some(limit);
        self
    }

    pub fn backfill_workers(mut self, workers: usize) -> Self {
        self.backfill_workers = Some(workers);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn queue_poll_interval(mut self, interval: Duration) -> Self {
        self.queue_poll_interval = Some(interval);
        self
    }

    pub fn tip_interval(mut self, interval: Duration) -> Self {
        self.tip_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.retry_initial_delay = Some(delay);
        self
    }

    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = Some(delay);
        self
    }

    pub fn tip_sync_enabled(mut self, enabled: bool) -> Self {
        self.tip_sync_enabled = Some(enabled);
        self
    }

    pub fn backfill_enabled(mut self, enabled: bool) -> Self {
        self.backfill_enabled = Some(enabled);
        self
    }

    /// Overlays `SEAPORT_SYNC_*` environment variables on top of the builder.
    pub fn with_env(self) -> Result<Self> {
        self.with_lookup(|key| std::env::var(key).ok())
    }

    fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("SEAPORT_SYNC_{name}"));

        if let Some(url) = var("API_URL") {
            self = self.api_url(url);
        }
        if let Some(chain) = var("CHAIN") {
            self = self.chain(chain);
        }
        if let Some(key) = var("API_KEY") {
            self = self.api_key(key);
        }
        if let Some(path) = var("DATABASE") {
            self = self.database_path(path);
        }
        if let Some(size) = var("PAGE_SIZE") {
            self = self.page_size(parse_env("SEAPORT_SYNC_PAGE_SIZE", &size)?);
        }
        if let Some(workers) = var("WORKERS") {
            self = self.backfill_workers(parse_env("SEAPORT_SYNC_WORKERS", &workers)?);
        }
        if let Some(secs) = var("TIP_INTERVAL_SECS") {
            let secs: u64 = parse_env("SEAPORT_SYNC_TIP_INTERVAL_SECS", &secs)?;
            self = self.tip_interval(Duration::from_secs(secs));
        }
        if let Some(flag) = var("TIP_SYNC") {
            self = self.tip_sync_enabled(parse_flag("SEAPORT_SYNC_TIP_SYNC", &flag)?);
        }
        if let Some(flag) = var("BACKFILL") {
            self = self.backfill_enabled(parse_flag("SEAPORT_SYNC_BACKFILL", &flag)?);
        }
        Ok(self)
    }

    pub fn build(self) -> Result<SyncConfig> {
        let params = SyncConfigParams {
            api_url: self.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_owned()),
            chain: self.chain.unwrap_or_else(|| DEFAULT_CHAIN.to_owned()),
            api_key: self.api_key,
            database_path: self
                .database_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            page_size: self.page_size.unwrap_or(MAX_PAGE_SIZE),
            parse_concurrency: self
                .parse_concurrency
                .unwrap_or(DEFAULT_PARSE_CONCURRENCY),
            backfill_workers: self.backfill_workers.unwrap_or(DEFAULT_BACKFILL_WORKERS),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            queue_poll_interval: self
                .queue_poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_QUEUE_POLL_INTERVAL_MS)),
            tip_interval: self
                .tip_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_TIP_INTERVAL_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            retry_initial_delay: self.retry_initial_delay.unwrap_or(Duration::ZERO),
            retry_max_delay: self
                .retry_max_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RETRY_MAX_DELAY_SECS)),
            tip_sync_enabled: self.tip_sync_enabled.unwrap_or(true),
            backfill_enabled: self.backfill_enabled.unwrap_or(true),
        };

        SyncConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("api_url must start with http:// or https://");
    }
    Ok(())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{key} has an invalid value {value:?}"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key} must be a boolean, got {other:?}"),
    }
}

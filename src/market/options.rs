//! Knobs for the marketplace HTTP client: timeouts, in-client retries, and the
//! identity headers sent with every request.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:109.0) Gecko/20100101 Firefox/110.0";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_ATTEMPTS: usize = 1;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct ApiClientOptions {
    pub request_timeout: Duration,
    /// Attempts per page inside the client. Backfill tasks already requeue on
    /// failure, so one attempt is the default.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub user_agent: String,
    pub api_key: Option<String>,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            api_key: None,
        }
    }
}

impl ApiClientOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.initial_backoff.is_zero() {
            bail!("initial_backoff must be greater than 0");
        }
        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must be at least initial_backoff");
        }
        if self.user_agent.trim().is_empty() {
            bail!("user_agent cannot be empty");
        }
        Ok(())
    }
}

//! HTTP client for the marketplace listings endpoint and the `OrderSource`
//! abstraction consumed by tip sync and backfill workers.

use crate::market::circuit_breaker::ApiCircuitBreaker;
use crate::market::metrics::{ApiMetrics, ApiMetricsSnapshot};
use crate::market::options::ApiClientOptions;
use crate::market::types::{OrderPage, PageQuery, WirePage};
use crate::processor::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition};
use crate::runtime::config::SyncConfig;
use anyhow::{anyhow, bail, Context, Result};
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use std::sync::Arc;
use tokio::time::Instant;

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug)]
pub enum MarketError {
    Timeout,
    CircuitOpen,
    Status { status: u16, body: String },
    Transport(String),
    Decode(String),
}

impl MarketError {
    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            MarketError::Timeout | MarketError::Transport(_) => true,
            MarketError::Status { status, .. } => *status == 429 || *status >= 500,
            MarketError::CircuitOpen | MarketError::Decode(_) => false,
        }
    }
}

impl std::fmt::Display for MarketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketError::Timeout => write!(f, "listings request timed out"),
            MarketError::CircuitOpen => write!(f, "marketplace circuit breaker is open"),
            MarketError::Status { status, body } => {
                write!(f, "listings request failed with status {status}: {body}")
            }
            MarketError::Transport(message) => write!(f, "listings transport error: {message}"),
            MarketError::Decode(message) => {
                write!(f, "failed to decode listings response: {message}")
            }
        }
    }
}

impl std::error::Error for MarketError {}

pub type FetchFuture<'a> = BoxFuture<'a, Result<OrderPage>>;

/// Anything that can serve pages of listings.
pub trait OrderSource: Send + Sync {
    fn fetch_page<'a>(&'a self, query: &'a PageQuery) -> FetchFuture<'a>;
}

#[derive(Debug, Clone)]
pub struct MarketClient {
    listings_url: Arc<String>,
    client: reqwest::Client,
    options: ApiClientOptions,
    metrics: Arc<ApiMetrics>,
    breaker: Arc<ApiCircuitBreaker>,
}

impl OrderSource for MarketClient {
    fn fetch_page<'a>(&'a self, query: &'a PageQuery) -> FetchFuture<'a> {
        Box::pin(self.fetch_page(query))
    }
}

impl MarketClient {
    pub fn new(base_url: impl Into<String>, chain: impl Into<String>) -> Result<Self> {
        Self::with_options(base_url, chain, ApiClientOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        chain: impl Into<String>,
        options: ApiClientOptions,
    ) -> Result<Self> {
        Self::with_options_and_breaker(
            base_url,
            chain,
            options,
            Arc::new(ApiCircuitBreaker::default()),
        )
    }

    pub fn with_options_and_breaker(
        base_url: impl Into<String>,
        chain: impl Into<String>,
        options: ApiClientOptions,
        breaker: Arc<ApiCircuitBreaker>,
    ) -> Result<Self> {
        options.validate()?;

        let base_url = base_url.into();
        let chain = chain.into();
        if chain.trim().is_empty() {
            bail!("chain cannot be empty");
        }
        let listings_url = format!(
            "{}/v2/orders/{}/seaport/listings",
            base_url.trim_end_matches('/'),
            chain.trim()
        );

        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .user_agent(options.user_agent.as_str())
            .default_headers(build_headers(options.api_key.as_deref())?)
            .build()
            .map_err(|err| anyhow!("failed to build marketplace client: {err}"))?;

        Ok(Self {
            listings_url: Arc::new(listings_url),
            client,
            options,
            metrics: Arc::new(ApiMetrics::default()),
            breaker,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        let options = ApiClientOptions {
            request_timeout: config.request_timeout(),
            api_key: config.api_key().map(str::to_owned),
            ..ApiClientOptions::default()
        };
        Self::with_options(config.api_url(), config.chain(), options)
    }

    pub fn endpoint(&self) -> &str {
        &self.listings_url
    }

    pub fn metrics(&self) -> ApiMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    pub async fn fetch_page(&self, query: &PageQuery) -> Result<OrderPage> {
        let policy = RetryBackoff::new(self.options.initial_backoff, self.options.max_backoff)
            .with_max_attempts(self.options.max_attempts);

        retry_with_backoff(
            policy,
            |_| self.fetch_once(query),
            |attempt, delay, err, will_retry| {
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    will_retry,
                    cursor = ?query.cursor,
                    error = %err,
                    "listings request failed"
                );
            },
            |_, err| match err.downcast_ref::<MarketError>() {
                Some(market_err) if !market_err.is_transient() => RetryDisposition::Abort,
                _ => RetryDisposition::Retry,
            },
        )
        .await
    }

    async fn fetch_once(&self, query: &PageQuery) -> Result<OrderPage> {
        if self.breaker.before_request().is_err() {
            return Err(MarketError::CircuitOpen.into());
        }

        let start = Instant::now();
        let result = self.send(query).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(page) => {
                self.metrics.record_success(elapsed, page.orders.len());
                self.breaker.record_success();
                tracing::debug!(
                    orders = page.orders.len(),
                    malformed = page.malformed,
                    has_next = page.next.is_some(),
                    latency_ms = elapsed.as_millis() as u64,
                    "listings page fetched"
                );
            }
            Err(err) => {
                if matches!(err.downcast_ref::<MarketError>(), Some(MarketError::Timeout)) {
                    self.metrics.record_timeout(elapsed);
                } else {
                    self.metrics.record_failure(elapsed);
                }
                self.breaker.record_failure();
            }
        }

        result
    }

    async fn send(&self, query: &PageQuery) -> Result<OrderPage> {
        let response = self
            .client
            .get(self.listings_url.as_str())
            .query(&query.to_query_pairs())
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketError::Status {
                status: status.as_u16(),
                body: truncate(body),
            }
            .into());
        }

        let page: WirePage = response.json().await.map_err(|err| {
            if err.is_timeout() {
                MarketError::Timeout
            } else {
                MarketError::Decode(err.to_string())
            }
        })?;

        Ok(OrderPage::from_wire(page))
    }
}

fn build_headers(api_key: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
        let value = HeaderValue::from_str(key).context("api key is not a valid header value")?;
        headers.insert("X-API-KEY", value);
    }
    Ok(headers)
}

fn map_transport_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        MarketError::Timeout.into()
    } else {
        MarketError::Transport(err.to_string()).into()
    }
}

fn truncate(mut body: String) -> String {
    if let Some((idx, _)) = body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        body.truncate(idx);
    }
    body
}

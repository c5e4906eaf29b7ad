//! Marketplace API plumbing: listing types, the HTTP client, circuit breaker,
//! and request metrics.

pub mod circuit_breaker;
pub mod client;
pub mod metrics;
pub mod options;
pub mod types;

pub use circuit_breaker::{ApiCircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use client::{MarketClient, MarketError, OrderSource};
pub use metrics::ApiMetricsSnapshot;
pub use options::ApiClientOptions;
pub use types::{
    ConsiderationItem, Cursor, OfferItem, OrderDirection, OrderPage, OrderParameters, PageQuery,
    ProtocolData, RawOrder, Timestamp,
};

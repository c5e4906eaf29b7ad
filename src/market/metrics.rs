//! Counters for listing requests so the client can expose aggregated
//! snapshots of latency and failure rates.

use crate::market::circuit_breaker::CircuitState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct ApiMetrics {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    total_timeouts: AtomicU64,
    total_latency_ns: AtomicU64,
    total_orders: AtomicU64,
}

impl ApiMetrics {
    pub(crate) fn record_success(&self, latency: Duration, orders: usize) {
        self.record_request(latency);
        self.total_orders.fetch_add(orders as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, latency: Duration) {
        self.record_request(latency);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self, latency: Duration) {
        self.record_failure(latency);
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_request(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, breaker_state: CircuitState) -> ApiMetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let total_latency_ns = self.total_latency_ns.load(Ordering::Relaxed);

        let (average_latency_ms, error_rate) = if total_requests == 0 {
            (0.0, 0.0)
        } else {
            (
                (total_latency_ns as f64 / total_requests as f64) / 1_000_000.0,
                total_errors as f64 / total_requests as f64,
            )
        };

        ApiMetricsSnapshot {
            total_requests,
            total_errors,
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            total_orders: self.total_orders.load(Ordering::Relaxed),
            average_latency_ms,
            error_rate,
            breaker_state,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct ApiMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
    pub total_orders: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
    pub breaker_state: CircuitState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_aggregates_requests() {
        let metrics = ApiMetrics::default();
        metrics.record_success(Duration::from_millis(10), 50);
        metrics.record_timeout(Duration::from_millis(30));

        let snapshot = metrics.snapshot(CircuitState::Closed);
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.total_errors, 1);
        assert_eq!(snapshot.total_timeouts, 1);
        assert_eq!(snapshot.total_orders, 50);
        assert!((snapshot.average_latency_ms - 20.0).abs() < 0.001);
        assert!((snapshot.error_rate - 0.5).abs() < f64::EPSILON);
    }
}

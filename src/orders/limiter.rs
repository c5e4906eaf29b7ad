use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};

pub const DEFAULT_PARSE_CONCURRENCY: usize = 20;

/// Runs a batch of futures with at most `limit` in flight. Results come back
/// in completion order.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLimiter {
    limit: usize,
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PARSE_CONCURRENCY)
    }
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The batch is built up front so the returned future stays `Send` for
    /// callers that spawn it.
    pub async fn run<'a, T>(&self, futures: Vec<BoxFuture<'a, T>>) -> Vec<T>
    where
        T: Send + 'a,
    {
        stream::iter(futures)
            .buffer_unordered(self.limit)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_limit() {
        let limiter = ConcurrencyLimiter::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futures = (0..12u64)
            .map(|n| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2 + n % 3)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    n
                }
                .boxed()
            })
            .collect();
        let results = limiter.run(futures).await;

        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn batch_can_be_driven_from_a_spawned_task() {
        let limiter = ConcurrencyLimiter::new(2);
        let words = vec![String::from("a"), String::from("bb"), String::from("ccc")];

        let lengths = tokio::spawn(async move {
            let futures = words
                .iter()
                .map(|word| async move { word.len() }.boxed())
                .collect();
            let mut lengths = limiter.run(futures).await;
            lengths.sort_unstable();
            lengths
        })
        .await
        .unwrap();

        assert_eq!(lengths, vec![1, 2, 3]);
    }

    #[test]
    fn zero_limit_is_clamped() {
        assert_eq!(ConcurrencyLimiter::new(0).limit(), 1);
        assert_eq!(ConcurrencyLimiter::default().limit(), 20);
    }
}

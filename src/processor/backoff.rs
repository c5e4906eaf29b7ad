use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<usize>,
}

impl RetryBackoff {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: None,
        }
    }

    pub(crate) fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

pub(crate) async fn retry_with_backoff<T, F, Fut, L, C>(
    config: RetryBackoff,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error, bool),
    C: FnMut(usize, &anyhow::Error) -> RetryDisposition,
{
    let mut attempt = 0;
    let mut backoff = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => match classify_error(attempt, &err) {
                RetryDisposition::Abort => return Err(err),
                RetryDisposition::Retry => {
                    let exhausted = config
                        .max_attempts
                        .map(|max| attempt >= max)
                        .unwrap_or(false);

                    on_retry(attempt, backoff, &err, !exhausted);

                    if exhausted {
                        return Err(err);
                    }

                    sleep_with_cancellation(backoff, None).await?;
                    backoff = next_backoff(backoff, config.max_delay);
                }
            },
        }
    }
}

/// Sleeps for `delay`, returning early with an error when the token fires.
pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(anyhow!("sleep cancelled")),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}

/// Delay before the `attempts`-th re-run of a failed task:
/// `initial * 2^(attempts - 1)`, capped at `max`. Zero attempts means no delay.
pub(crate) fn requeue_delay(attempts: u32, initial: Duration, max: Duration) -> Duration {
    if attempts == 0 || initial.is_zero() {
        return Duration::ZERO;
    }

    let exponent = attempts.saturating_sub(1);
    let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    initial.saturating_mul(multiplier).min(max)
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}

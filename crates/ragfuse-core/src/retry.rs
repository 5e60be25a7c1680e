//! Bounded exponential backoff for calls to external collaborators.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4, initial_delay_ms: 400, max_delay_ms: 10_000, multiplier: 2.0 }
    }
}

impl RetryPolicy {
    /// A single attempt, no backoff.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay_ms`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Longest a call can take when every attempt runs for `per_attempt`.
    pub fn worst_case(&self, per_attempt: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        (0..attempts - 1).fold(per_attempt * attempts, |total, attempt| total + self.delay_for_attempt(attempt))
    }
}

/// Runs `operation` until it succeeds, `should_retry` rejects the error, or the
/// attempt budget is spent. The last error is returned.
pub async fn retry_async<T, E, F, Fut, P>(policy: &RetryPolicy, mut operation: F, should_retry: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= attempts || !should_retry(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt - 1);
                tracing::debug!(attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "retrying remote call");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, initial_delay_ms: 1, max_delay_ms: 5, multiplier: 2.0 }
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1600));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(10_000));
        assert_eq!(policy.worst_case(Duration::from_secs(1)), Duration::from_millis(4_000 + 400 + 800 + 1_600));
        assert_eq!(RetryPolicy::none().worst_case(Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry_async(
            &fast(3),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry_async(
            &fast(4),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            |_| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_async(
            &fast(4),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("transient") } else { Ok(n) } }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(2));
    }
}

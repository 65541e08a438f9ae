//! Bounded-retry acquisition of store handles.
//!
//! Only used at the edge, when a store is opened. The collapse loop itself
//! never retries: a failed dataset is picked up again on the next run.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::errors::{CollapseError, Result};

/// Exponential backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Base delay plus up to 25% random jitter, still capped at `max_delay`
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = base.mul_f64(fastrand::f64() * 0.25);
        (base + jitter).min(self.max_delay)
    }
}

/// Run `open` until it succeeds, a non-transient error occurs, or the policy
/// runs out of attempts.
pub async fn acquire_with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut open: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match open().await {
            Ok(handle) => {
                if attempt > 1 {
                    info!("Acquired {} after {} attempts", what, attempt);
                }
                return Ok(handle);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                return Err(CollapseError::Connection {
                    what: what.to_string(),
                    attempts: attempt,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.delay_with_jitter(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    category = e.category(),
                    "Failed to acquire {}: {} (retrying in {:?})",
                    what,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        };
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(4));
        assert_eq!(policy.base_delay(4), Duration::from_secs(5));
        assert!(policy.delay_with_jitter(9) <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = acquire_with_retry(&fast_policy(5), "store", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CollapseError::store("open", "connection refused"))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = acquire_with_retry(&fast_policy(3), "store", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(CollapseError::store("open", "connection refused"))
        })
        .await;

        match result {
            Err(CollapseError::Connection { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected connection error, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = acquire_with_retry(&fast_policy(5), "store", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(CollapseError::configuration("bad path"))
        })
        .await;

        assert!(matches!(result, Err(CollapseError::Configuration { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! A single retry policy shared by every external-call stage.
//!
//! ## Retry strategy
//!
//! Rate limits and 5xx responses are frequent under concurrent load.
//! Exponential backoff (`base_delay_ms * 2^(attempt-1)`) avoids the
//! thundering-herd problem where N concurrent workers retry simultaneously
//! and immediately overwhelm a recovering endpoint: with a 500 ms base and
//! 3 retries the wait sequence is 500 ms → 1 s → 2 s.
//!
//! Only *transient* failures consume the budget. Permanent failures (auth,
//! rejected input, invariant violations) return on the first attempt, so a
//! bad API key fails in one round-trip instead of four.

use crate::provider::ServiceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Errors that know whether a retry could help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for ServiceError {
    fn is_transient(&self) -> bool {
        ServiceError::is_transient(self)
    }
}

/// Bounded exponential-backoff retry, applied uniformly by the extractor,
/// planner, and synthesizer.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `max_retries = 3` means up to 4
    /// total attempts.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each subsequent retry.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << (attempt - 1).min(16)))
    }

    /// Run `op` until it succeeds, fails permanently, or exhausts the budget.
    ///
    /// `what` names the operation in retry logs. The closure receives the
    /// 0-based attempt number so callers can vary their request (e.g. the
    /// planner's repair prompt does not use this; it has its own loop).
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        "{what}: retry {attempt}/{} after {}ms — {e}",
                        self.max_retries,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (transient={})", self.transient)
        }
    }

    impl Transient for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    #[tokio::test]
    async fn succeeds_first_try_without_delay() {
        let policy = RetryPolicy::new(3, 1);
        let result: Result<u32, TestError> = policy.run("op", |_| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let policy = RetryPolicy::new(3, 1);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let result: Result<u32, TestError> = policy
            .run("op", move |_| {
                let calls = Arc::clone(&calls_ref);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError { transient: true })
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_fails_on_first_attempt() {
        let policy = RetryPolicy::new(3, 1);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let result: Result<u32, TestError> = policy
            .run("op", move |_| {
                let calls = Arc::clone(&calls_ref);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError { transient: false })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry on permanent");
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(2, 1);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let result: Result<u32, TestError> = policy
            .run("op", move |_| {
                let calls = Arc::clone(&calls_ref);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError { transient: true })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3, "1 attempt + 2 retries");
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(3, 500);
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }
}

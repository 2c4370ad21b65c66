//! Bounded retries with exponential backoff for store requests
//!
//! A request that timed out, could not connect or got a 5xx answer is sent
//! again after a growing pause. Everything else fails on the first
//! attempt; the caller decides which is which.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How often and how patiently a store request is repeated
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one (3)
    pub max_retries: u32,
    /// Pause before the first repeat (100ms)
    pub initial_delay: Duration,
    /// Longest pause between two attempts (5s)
    pub max_delay: Duration,
    /// Growth of the pause per attempt (2.0)
    pub multiplier: f64,
    /// Stretch each pause by a random 0-25% so clients do not retry in step
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Pause after failed attempt `attempt` (0 is the first request)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let cap_ms = self.max_delay.as_millis() as f64;
        let growth = self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let mut delay_ms = (self.initial_delay.as_millis() as f64 * growth).min(cap_ms);
        if self.jitter {
            delay_ms += delay_ms * rand::random::<f64>() * 0.25;
        }
        Duration::from_millis(delay_ms as u64)
    }

    /// True while failed attempt `attempt` still leaves retries
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out
    ///
    /// `retriable` decides which errors are worth another attempt.
    pub async fn execute<F, Fut, T, E, R>(
        &self,
        operation: &str,
        mut op: F,
        retriable: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if self.should_retry(attempt) && retriable(&e) {
                        let delay = self.delay_for_attempt(attempt);
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            ?delay,
                            error = %e,
                            "store request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_policy_delay() {
        let policy = RetryPolicy {
            jitter: false,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));

        // Should cap at max_delay
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_retry_policy_should_retry() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::none().should_retry(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_then_succeeds() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = policy
            .execute(
                "query",
                move || async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Upstream("503".into()))
                    } else {
                        Ok(7)
                    }
                },
                Error::is_upstream,
            )
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_gives_up() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = policy
            .execute(
                "write",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Upstream("timeout".into()))
                },
                Error::is_upstream,
            )
            .await;

        assert!(result.unwrap_err().is_upstream());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_skips_permanent_errors() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = policy
            .execute(
                "query",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Parse("bad body".into()))
                },
                Error::is_upstream,
            )
            .await;

        assert!(matches!(result, Err(Error::Parse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

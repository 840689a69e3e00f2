//! Bounded retry of a probe ("eventually succeeds or times out")
//!
//! Reads go through a cache that lags the authoritative store, and the
//! operator writes the same objects concurrently. Probes therefore report
//! "not yet" as [`StepError::Pending`] and get invoked again until they
//! pass or the wall-clock budget runs out. Any other error ends the retry
//! loop immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
use crate::error::StepError;

/// Retry policy bounded by elapsed time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Eventually {
    /// Total wall-clock budget, measured from the first attempt
    pub timeout: Duration,
    /// Delay between two attempts (shortened so the last attempt lands on the deadline)
    pub poll_interval: Duration,
}

impl Default for Eventually {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

impl Eventually {
    /// Create a policy
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Invoke `probe` until it succeeds, fails for good, or the budget is spent.
    ///
    /// Never gives up before `timeout` has elapsed: a probe that keeps
    /// returning [`StepError::Pending`] is attempted one last time at the
    /// deadline, and that failure becomes [`StepError::TimedOut`].
    pub async fn run<F, Fut>(&self, name: &str, mut probe: F) -> Result<(), StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), StepError>>,
    {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let pending = match probe().await {
                Ok(()) => {
                    if attempts > 1 {
                        debug!(step = %name, attempts, elapsed = ?start.elapsed(), "condition met");
                    }
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                warn!(
                    step = %name,
                    attempts,
                    timeout = ?self.timeout,
                    error = %pending,
                    "condition not met before timeout"
                );
                return Err(StepError::TimedOut {
                    timeout: self.timeout,
                    attempts,
                    last: pending.to_string(),
                });
            }

            debug!(step = %name, attempt = attempts, reason = %pending, "not yet, retrying");
            sleep(self.poll_interval.min(self.timeout - elapsed)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(timeout_secs: u64, poll_secs: u64) -> Eventually {
        Eventually::new(
            Duration::from_secs(timeout_secs),
            Duration::from_secs(poll_secs),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_immediately_without_waiting() {
        let start = Instant::now();
        let result = policy(10, 1).run("noop", || async { Ok(()) }).await;
        assert_eq!(result, Ok(()));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn condition_that_becomes_true_is_observed() {
        let start = Instant::now();
        let result = policy(10, 1)
            .run("becomes true", || async move {
                if start.elapsed() >= Duration::from_secs(3) {
                    Ok(())
                } else {
                    Err(StepError::pending("not yet"))
                }
            })
            .await;
        assert_eq!(result, Ok(()));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn condition_that_never_holds_fails_once_at_the_deadline() {
        let attempts = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let counter = attempts.clone();
        let result = policy(5, 1)
            .run("never", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::pending("still waiting"))
                }
            })
            .await;

        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        assert_eq!(
            result,
            Err(StepError::TimedOut {
                timeout: Duration::from_secs(5),
                attempts: 6,
                last: "still waiting".to_string(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn final_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = policy(5, 1)
            .run("forbidden", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::failed("pods is forbidden"))
                }
            })
            .await;
        assert_eq!(result, Err(StepError::failed("pods is forbidden")));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn misconfiguration_is_not_retried() {
        let result = policy(5, 1)
            .run("misused", || async { Err(StepError::misconfigured("no lineage")) })
            .await;
        assert_eq!(result, Err(StepError::misconfigured("no lineage")));
    }

    #[tokio::test(start_paused = true)]
    async fn last_attempt_lands_on_the_deadline() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let start = Instant::now();
        let result = policy(2, 10)
            .run("slow poll", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::pending("nope"))
                }
            })
            .await;
        assert!(matches!(result, Err(StepError::TimedOut { attempts: 2, .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}

//! Retry with exponential backoff for transient failures.
//!
//! The policy is a plain value; the waiting itself always goes through
//! [`Scheduler::backoff`] so the scheduler stays the only place that sleeps.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::app::{QuireError, Result};
use crate::politeness::Scheduler;

/// Longest single backoff, whatever the attempt number.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first try included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_range: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            jitter_range: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1 = first retry), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }

    /// Random extra delay in `[0, jitter_range]`.
    pub fn jitter(&self) -> Duration {
        let max_ms = self.jitter_range.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Whether another attempt is allowed after `attempts_made` tries.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy is spent.
///
/// Only errors for which [`QuireError::is_transient`] holds are retried.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    scheduler: &Scheduler,
    what: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempts = attempt, "{} succeeded after retry", what);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && policy.allows_retry(attempt) => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "{} failed, retrying",
                    what
                );
                scheduler.backoff(policy, attempt).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(error = %e, attempts = attempt, "{} failed after all retries", what);
                }
                return Err(e);
            }
        }
    }
}

/// Collapse an exhausted or permanent error into a short reason for the store.
pub fn failure_reason(err: &QuireError) -> String {
    match err {
        QuireError::Status { status, .. } => format!("HTTP {}", status),
        QuireError::Http(e) if e.is_timeout() => "timeout".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::config::PolitenessConfig;

    fn busy() -> QuireError {
        QuireError::Status {
            url: "https://a.example/api".into(),
            status: 503,
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(&PolitenessConfig::immediate(), Duration::ZERO)
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            jitter_range: Duration::ZERO,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(40), MAX_BACKOFF);
    }

    #[test]
    fn test_jitter_within_range() {
        let policy = RetryPolicy {
            jitter_range: Duration::from_millis(50),
            ..Default::default()
        };
        for _ in 0..100 {
            assert!(policy.jitter() <= Duration::from_millis(50));
        }
        let none = RetryPolicy {
            jitter_range: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(none.jitter(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_until_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::default();

        let result = with_retry(&policy, &scheduler(), "fetch", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(busy())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        };

        let result: Result<()> = with_retry(&policy, &scheduler(), "fetch", || {
            calls.set(calls.get() + 1);
            async { Err(busy()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let calls = Cell::new(0);

        let result: Result<()> = with_retry(&RetryPolicy::default(), &scheduler(), "fetch", || {
            calls.set(calls.get() + 1);
            async {
                Err(QuireError::Status {
                    url: "https://a.example/p/x".into(),
                    status: 404,
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            jitter_range: Duration::ZERO,
        };
        let start = tokio::time::Instant::now();

        let _: Result<()> = with_retry(&policy, &scheduler(), "fetch", || async { Err(busy()) }).await;

        // 2s before the second try, 4s before the third.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[test]
    fn test_failure_reason() {
        assert_eq!(failure_reason(&busy()), "HTTP 503");
    }
}

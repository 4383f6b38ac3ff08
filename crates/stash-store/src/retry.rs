//! Retry policy with exponential backoff and full jitter.
//!
//! The undelayed delay for attempt `n` (1-indexed retries) is
//! `min(max_delay, initial_delay * 2^(n-1))`. With jitter enabled the actual
//! sleep is drawn uniformly from `0..=delay` (the "full jitter" strategy).

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Bounded retry budget for transient store failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, the first call included. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the exponential growth.
    pub max_delay: Duration,
    /// Draw each sleep uniformly from zero up to the computed delay.
    #[serde(default)]
    pub jitter: bool,
}

impl RetryPolicy {
    /// Creates a policy without jitter.
    #[must_use]
    pub const fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            jitter: false,
        }
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Enables or disables full jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// The undelayed backoff before retry number `attempt`.
    ///
    /// Attempt 0 is the initial call and never waits.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// The sleep before retry number `attempt`, with jitter applied if enabled.
    #[must_use]
    pub fn sleep_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let cap = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(fastrand::u64(0..=cap))
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    #[must_use]
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, Duration::from_millis(50), Duration::from_secs(2)).with_jitter(true)
    }
}

/// Result of [`retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded.
    Success(T),
    /// The operation failed with a non-retryable error, or the budget ran out.
    Failed {
        /// The final error.
        error: E,
        /// Total number of attempts made.
        attempts: u32,
        /// Whether the final error was still considered retryable.
        retryable: bool,
    },
}

/// Run `operation` until it succeeds, fails permanently or the budget runs out.
///
/// `operation` receives the 0-indexed attempt number. `is_retryable` decides
/// whether an error is worth another attempt.
pub async fn retry<T, E, Fut, F, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return RetryOutcome::Success(value),
            Err(error) => {
                let attempts = attempt.saturating_add(1);
                let retryable = is_retryable(&error);
                if !retryable || !policy.allows_another(attempts) {
                    return RetryOutcome::Failed {
                        error,
                        attempts,
                        retryable,
                    };
                }
                attempt = attempts;
                let sleep = policy.sleep_for_attempt(attempt);
                debug!(attempt, ?sleep, "retrying after transient failure");
                tokio::time::sleep(sleep).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_delay() {
        let policy =
            RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1)).with_jitter(true);
        for _ in 0..200 {
            assert!(policy.sleep_for_attempt(3) <= Duration::from_millis(400));
        }
    }

    #[test]
    fn test_no_retry_allows_single_attempt() {
        let policy = RetryPolicy::no_retry();
        assert!(policy.allows_another(0));
        assert!(!policy.allows_another(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_millis(10), Duration::from_millis(50));
        let counter = Arc::clone(&calls);
        let outcome = retry(
            &policy,
            move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("busy")
                    } else {
                        Ok(7)
                    }
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(outcome, RetryOutcome::Success(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_budget() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50));
        let outcome: RetryOutcome<(), &str> =
            retry(&policy, |_| async { Err("busy") }, |_| true).await;
        assert_eq!(
            outcome,
            RetryOutcome::Failed {
                error: "busy",
                attempts: 3,
                retryable: true,
            }
        );
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10), Duration::from_millis(50));
        let outcome: RetryOutcome<(), &str> =
            retry(&policy, |_| async { Err("denied") }, |e| *e != "denied").await;
        assert_eq!(
            outcome,
            RetryOutcome::Failed {
                error: "denied",
                attempts: 1,
                retryable: false,
            }
        );
    }
}

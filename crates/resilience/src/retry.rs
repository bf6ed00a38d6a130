//! Per-step retry policy with exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a failed attempt should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given delay, then re-invoke.
    Retry {
        /// Backoff delay before the next attempt.
        delay: Duration,
    },
    /// Stop retrying and promote the failure.
    Abort {
        /// Why retrying stopped.
        reason: AbortReason,
    },
}

/// Why a retry policy refused another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The error code is listed in `abort_on`.
    AbortListed,
    /// All allowed attempts have been used.
    ExhaustedAttempts,
    /// The error code is not listed in a non-empty `retry_on`.
    NotRetryable,
}

/// Retry configuration attached to a step.
///
/// On failure the policy is consulted with the error's code and the attempt
/// number (1-indexed): codes in `abort_on` and exhausted attempts promote
/// the failure; otherwise codes in `retry_on` (or any code, when `retry_on`
/// is empty) retry after `min(initial_delay · multiplierⁿ, max_delay)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first (must be ≥ 1).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "crate::serde_duration_ms")]
    pub initial_delay: Duration,
    /// Multiplier applied per subsequent attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    #[serde(with = "crate::serde_duration_ms")]
    pub max_delay: Duration,
    /// Error codes that are retried. Empty means every code is retryable.
    #[serde(default)]
    pub retry_on: Vec<String>,
    /// Error codes that abort immediately, overriding `retry_on`.
    #[serde(default)]
    pub abort_on: Vec<String>,
    /// Jitter fraction in `[0, 1]`; `0.0` keeps delays deterministic.
    #[serde(default)]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            retry_on: Vec::new(),
            abort_on: Vec::new(),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the maximum number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the delay before the second attempt.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the per-attempt backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the upper bound on any single delay.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Restrict retries to the given error codes.
    #[must_use]
    pub fn retry_on(mut self, codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.retry_on = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Abort immediately on the given error codes.
    #[must_use]
    pub fn abort_on(mut self, codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.abort_on = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Add jitter to computed delays (fraction in `[0, 1]`).
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Backoff delay after the given failed attempt (1-indexed):
    /// `min(initial_delay · multiplier^(attempt−1), max_delay)`,
    /// with optional jitter applied on top.
    #[must_use]
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let factor = 1.0 + self.jitter * (fastrand::f64() * 2.0 - 1.0);
            (capped * factor).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Decide what to do after attempt `attempt` (1-indexed) failed with
    /// the given error code.
    #[must_use]
    pub fn decide(&self, error_code: &str, attempt: u32) -> RetryDecision {
        if self.abort_on.iter().any(|c| c == error_code) {
            return RetryDecision::Abort {
                reason: AbortReason::AbortListed,
            };
        }
        if attempt >= self.max_attempts {
            return RetryDecision::Abort {
                reason: AbortReason::ExhaustedAttempts,
            };
        }
        if self.retry_on.is_empty() || self.retry_on.iter().any(|c| c == error_code) {
            RetryDecision::Retry {
                delay: self.delay_after_attempt(attempt),
            }
        } else {
            RetryDecision::Abort {
                reason: AbortReason::NotRetryable,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy_10ms_x2() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(10))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_secs(1))
    }

    #[test]
    fn delay_follows_exponential_schedule() {
        let policy = policy_10ms_x2();
        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_millis(20));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_millis(40));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = policy_10ms_x2().with_max_delay(Duration::from_millis(25));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_millis(25));
        assert_eq!(policy.delay_after_attempt(10), Duration::from_millis(25));
    }

    #[test]
    fn decide_retries_until_exhausted() {
        let policy = policy_10ms_x2();
        assert_eq!(
            policy.decide("transient", 1),
            RetryDecision::Retry {
                delay: Duration::from_millis(10)
            }
        );
        assert_eq!(
            policy.decide("transient", 2),
            RetryDecision::Retry {
                delay: Duration::from_millis(20)
            }
        );
        assert_eq!(
            policy.decide("transient", 3),
            RetryDecision::Abort {
                reason: AbortReason::ExhaustedAttempts
            }
        );
    }

    #[test]
    fn decide_abort_listed_wins_over_retry_listed() {
        let policy = policy_10ms_x2()
            .retry_on(["transient"])
            .abort_on(["transient"]);
        assert_eq!(
            policy.decide("transient", 1),
            RetryDecision::Abort {
                reason: AbortReason::AbortListed
            }
        );
    }

    #[test]
    fn decide_unlisted_code_is_not_retryable() {
        let policy = policy_10ms_x2().retry_on(["transient"]);
        assert_eq!(
            policy.decide("fatal", 1),
            RetryDecision::Abort {
                reason: AbortReason::NotRetryable
            }
        );
    }

    #[test]
    fn empty_retry_on_retries_everything() {
        let policy = policy_10ms_x2();
        assert!(matches!(
            policy.decide("anything-at-all", 1),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn none_policy_aborts_on_first_failure() {
        let policy = RetryPolicy::none();
        assert_eq!(
            policy.decide("transient", 1),
            RetryDecision::Abort {
                reason: AbortReason::ExhaustedAttempts
            }
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = policy_10ms_x2().with_jitter(0.5);
        for _ in 0..100 {
            let delay = policy.delay_after_attempt(2);
            // base 20ms, jitter ±50% → [10ms, 30ms]
            assert!(delay >= Duration::from_millis(10), "delay {delay:?} below bound");
            assert!(delay <= Duration::from_millis(30), "delay {delay:?} above bound");
        }
    }

    #[test]
    fn serde_roundtrip() {
        let policy = policy_10ms_x2().retry_on(["transient"]).abort_on(["fatal"]);
        let json = serde_json::to_string(&policy).unwrap();
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_attempts, 3);
        assert_eq!(back.initial_delay, Duration::from_millis(10));
        assert_eq!(back.retry_on, vec!["transient".to_string()]);
    }

    proptest! {
        #[test]
        fn delays_are_monotone_and_capped(
            initial_ms in 1u64..1_000,
            multiplier in 1.0f64..4.0,
            max_ms in 1u64..60_000,
            attempt in 1u32..20,
        ) {
            let policy = RetryPolicy::default()
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_backoff_multiplier(multiplier)
                .with_max_delay(Duration::from_millis(max_ms));

            let current = policy.delay_after_attempt(attempt);
            let next = policy.delay_after_attempt(attempt + 1);
            prop_assert!(next >= current);
            prop_assert!(current <= Duration::from_millis(max_ms));
        }
    }
}

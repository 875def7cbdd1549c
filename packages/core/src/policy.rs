//! Retry policy applied after a failed attempt.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::FailedJobId;

/// Largest backoff exponent; keeps the delay arithmetic far from overflow.
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Bounded retries with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts allowed before the job is dead-lettered.
    pub max_attempts: u32,
    /// Delay after the first failure, in seconds. Doubles with every attempt.
    pub base_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 60,
        }
    }
}

/// Convert whole seconds to a `Duration`, clamping at the largest representable value.
pub(crate) fn seconds(secs: u64) -> Duration {
    let max = (i64::MAX / 1_000) as u64;
    Duration::seconds(secs.min(max) as i64)
}

/// What to do with a job whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the job to the queue after `delay`.
    Release { delay: Duration },
    /// Move the job to the dead-letter store.
    DeadLetter,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_secs: u64) -> Self {
        Self {
            max_attempts,
            base_delay_secs,
        }
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base backoff delay.
    pub fn with_base_delay_secs(mut self, base_delay_secs: u64) -> Self {
        self.base_delay_secs = base_delay_secs;
        self
    }

    /// Backoff before the next attempt, given the attempts made so far.
    ///
    /// `attempts` counts the failed reservation itself, so the first failure
    /// waits `base_delay`, the second `2 * base_delay`, and so on.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        seconds(self.base_delay_secs.saturating_mul(1u64 << exponent))
    }

    /// Decide the fate of a job that failed on its `attempts`-th reservation.
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if attempts < self.max_attempts {
            RetryDecision::Release {
                delay: self.backoff(attempts),
            }
        } else {
            RetryDecision::DeadLetter
        }
    }
}

/// Result of applying a [`RetryDecision`] to the stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The job went back to the queue.
    Released { available_at: DateTime<Utc> },
    /// The job now lives in the dead-letter store.
    DeadLettered { failed_id: FailedJobId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::seconds(60));
        assert_eq!(policy.backoff(2), Duration::seconds(120));
        assert_eq!(policy.backoff(3), Duration::seconds(240));
    }

    #[test]
    fn dead_letters_exactly_at_max_attempts() {
        let policy = RetryPolicy::new(3, 10);
        assert_eq!(
            policy.decide(1),
            RetryDecision::Release {
                delay: Duration::seconds(10)
            }
        );
        assert_eq!(
            policy.decide(2),
            RetryDecision::Release {
                delay: Duration::seconds(20)
            }
        );
        assert_eq!(policy.decide(3), RetryDecision::DeadLetter);
        assert_eq!(policy.decide(7), RetryDecision::DeadLetter);
    }

    #[test]
    fn single_attempt_policy_never_releases() {
        let policy = RetryPolicy::default().with_max_attempts(1);
        assert_eq!(policy.decide(1), RetryDecision::DeadLetter);
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = RetryPolicy::new(u32::MAX, u64::MAX);
        assert!(policy.backoff(u32::MAX - 1) > Duration::zero());
    }
}

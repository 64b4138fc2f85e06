//! # Retry Backoff Policy
//!
//! Exponential backoff with jitter for scheduled redelivery. The jitter offset is
//! additive only, so the expected delay stays non-decreasing across attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before an event is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied after exponentiation.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Fraction of the computed delay added as a random offset (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay for a 1-based attempt number.
    ///
    /// The exponential is computed in float seconds and clamped against
    /// `max_delay` before a `Duration` is built, so a large attempt number
    /// saturates at the cap instead of overflowing.
    pub fn backoff_delay(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()));

        if self.jitter_factor > 0.0 {
            let jitter = fastrand::f64() * self.jitter_factor;
            delay.mul_f64(1.0 + jitter).min(self.max_delay.mul_f64(1.0 + self.jitter_factor))
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = no_jitter();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = no_jitter();
        assert_eq!(policy.backoff_delay(20), Duration::from_secs(300));
    }

    #[test]
    fn test_huge_attempt_number_saturates_at_cap() {
        // Past attempt ~66 the uncapped exponential exceeds Duration range;
        // the delay must saturate, not panic.
        let policy = no_jitter();
        assert_eq!(policy.backoff_delay(200), Duration::from_secs(300));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.25,
            ..RetryPolicy::default()
        };
        for attempt in 1..=8 {
            let base = no_jitter().backoff_delay(attempt);
            for _ in 0..50 {
                let jittered = policy.backoff_delay(attempt);
                assert!(jittered >= base);
                assert!(jittered <= base.mul_f64(1.25) + Duration::from_millis(1));
            }
        }
    }

    #[test]
    fn test_delays_non_decreasing_in_expectation() {
        let policy = no_jitter();
        let mut previous = Duration::ZERO;
        for attempt in 1..=12 {
            let delay = policy.backoff_delay(attempt);
            assert!(delay >= previous);
            previous = delay;
        }
    }
}

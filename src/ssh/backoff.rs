//! Exponential backoff with jitter for connection attempts.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the computed delay added as random jitter (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let base = self.base_delay.mul_f64(self.multiplier.powi(exponent));
        let jitter = base.mul_f64(fastrand::f64() * self.jitter_factor);
        std::cmp::min(base + jitter, self.max_delay)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_exponentially_within_jitter() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
        };

        for (attempt, expected_ms) in [(1u32, 100u64), (2, 200), (3, 400)] {
            let delay = policy.delay_for_attempt(attempt);
            let lower = Duration::from_millis(expected_ms);
            let upper = Duration::from_millis(expected_ms + expected_ms / 10 + 1);
            assert!(delay >= lower && delay <= upper, "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = BackoffPolicy {
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(1));
    }

    #[test]
    fn test_should_retry() {
        let policy = BackoffPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}

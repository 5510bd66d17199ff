//! # Retry
//!
//! Backoff parameters for re-attempting a failed sink write.
use std::time;

#[derive(Clone, Debug, PartialEq, Eq)]
/// How many times, and how far apart, a failed operation is re-attempted.
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval before the first retry.
    pub initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    pub maximum_interval: Option<time::Duration>,
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Initialize a `RetryPolicyBuilder`.
    pub fn build(backoff_coefficient: u32, initial_interval: time::Duration) -> RetryPolicyBuilder {
        RetryPolicyBuilder::new(backoff_coefficient, initial_interval)
    }

    /// Interval to wait after the given (1-based) failed attempt.
    pub fn retry_interval(&self, attempt: u32) -> time::Duration {
        let candidate_interval = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt.saturating_sub(1)));

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts have failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::default().provide()
    }
}

/// Builder pattern struct to provide a `RetryPolicy`.
pub struct RetryPolicyBuilder {
    pub backoff_coefficient: u32,
    pub initial_interval: time::Duration,
    pub maximum_interval: Option<time::Duration>,
    pub max_attempts: u32,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: None,
            max_attempts: 5,
        }
    }
}

impl RetryPolicyBuilder {
    pub fn new(backoff_coefficient: u32, initial_interval: time::Duration) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            ..RetryPolicyBuilder::default()
        }
    }

    pub fn maximum_interval(mut self, interval: time::Duration) -> RetryPolicyBuilder {
        self.maximum_interval = Some(interval);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> RetryPolicyBuilder {
        self.max_attempts = attempts;
        self
    }

    /// Provide a `RetryPolicy` according to build parameters provided thus far.
    pub fn provide(&self) -> RetryPolicy {
        RetryPolicy {
            backoff_coefficient: self.backoff_coefficient,
            initial_interval: self.initial_interval,
            maximum_interval: self.maximum_interval,
            max_attempts: self.max_attempts.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_retry_interval() {
        let retry_policy = RetryPolicy::build(1, time::Duration::from_secs(2)).provide();

        for attempt in 1..=3 {
            assert_eq!(
                retry_policy.retry_interval(attempt),
                time::Duration::from_secs(2)
            );
        }
    }

    #[test]
    fn test_retry_interval_grows_and_is_capped() {
        let retry_policy = RetryPolicy::build(2, time::Duration::from_millis(500))
            .maximum_interval(time::Duration::from_secs(3))
            .provide();

        assert_eq!(retry_policy.retry_interval(1), time::Duration::from_millis(500));
        assert_eq!(retry_policy.retry_interval(2), time::Duration::from_secs(1));
        assert_eq!(retry_policy.retry_interval(3), time::Duration::from_secs(2));
        assert_eq!(retry_policy.retry_interval(4), time::Duration::from_secs(3));
        assert_eq!(retry_policy.retry_interval(40), time::Duration::from_secs(3));
    }

    #[test]
    fn test_attempt_budget() {
        let retry_policy = RetryPolicy::build(2, time::Duration::from_secs(1))
            .max_attempts(3)
            .provide();

        assert!(retry_policy.should_retry(1));
        assert!(retry_policy.should_retry(2));
        assert!(!retry_policy.should_retry(3));
    }

    #[test]
    fn test_zero_attempts_still_allows_one() {
        let retry_policy = RetryPolicy::build(2, time::Duration::from_secs(1))
            .max_attempts(0)
            .provide();

        assert_eq!(retry_policy.max_attempts, 1);
        assert!(!retry_policy.should_retry(1));
    }
}

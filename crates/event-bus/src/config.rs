//! Bus configuration.

use std::time::Duration;

/// Redelivery policy for failed deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total delivery attempts per subscriber, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per retry. Values below 1.0 are treated as 1.0.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let secs = self.base_delay.as_secs_f64() * factor;

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Attempt budget, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

/// Configuration for an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub retry: RetryPolicy,
    /// Deadline for a single handler invocation. Exceeding it counts as a
    /// failed attempt.
    pub handler_deadline: Duration,
    /// Buffer size of the diagnostics broadcast channel.
    pub diagnostics_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            handler_deadline: Duration::from_secs(10),
            diagnostics_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(300),
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for(50), Duration::from_millis(300));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(300));
    }

    #[test]
    fn shrinking_multiplier_is_flat() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(20),
            backoff_multiplier: 0.1,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for(4), Duration::from_millis(20));
    }

    #[test]
    fn at_least_one_attempt() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
    }
}

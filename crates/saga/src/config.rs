//! Saga configuration.

use std::time::Duration;

use domain::DEFAULT_CONFLICT_RETRIES;

/// Settings for the checkout saga handlers.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// How long a single gateway charge may take before it counts as a
    /// failure with reason `"timeout"`.
    pub gateway_deadline: Duration,

    /// How many times an order transition is re-run after a version conflict.
    pub conflict_retries: u32,
}

impl SagaConfig {
    /// Longest gateway deadline that fits a bus handler deadline.
    ///
    /// A quarter of the handler deadline stays reserved for recording the
    /// timeout and publishing `PaymentFailed` before the bus cancels the
    /// delivery.
    pub fn max_gateway_deadline(handler_deadline: Duration) -> Duration {
        handler_deadline * 3 / 4
    }

    /// Clamps the gateway deadline to
    /// [`max_gateway_deadline`](Self::max_gateway_deadline).
    pub fn fit_to_handler_deadline(mut self, handler_deadline: Duration) -> Self {
        let max = Self::max_gateway_deadline(handler_deadline);
        if self.gateway_deadline > max {
            tracing::warn!(
                configured = ?self.gateway_deadline,
                handler_deadline = ?handler_deadline,
                clamped = ?max,
                "gateway deadline does not fit the handler deadline, clamping"
            );
            self.gateway_deadline = max;
        }
        self
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            gateway_deadline: Duration::from_secs(5),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_deadline_is_clamped_below_handler_deadline() {
        let config = SagaConfig {
            gateway_deadline: Duration::from_millis(300),
            ..SagaConfig::default()
        }
        .fit_to_handler_deadline(Duration::from_millis(100));

        assert_eq!(config.gateway_deadline, Duration::from_millis(75));
    }

    #[test]
    fn test_gateway_deadline_within_budget_is_kept() {
        let config = SagaConfig::default().fit_to_handler_deadline(Duration::from_secs(30));
        assert_eq!(config.gateway_deadline, Duration::from_secs(5));
    }
}

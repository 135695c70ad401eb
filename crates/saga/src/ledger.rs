//! Append-only record of payment attempts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{AggregateId, EventId};
use domain::Money;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
}

/// One gateway charge made for an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub order_id: AggregateId,
    /// Identifier of the gateway that handled the charge.
    pub gateway_id: String,
    pub amount: Money,
    pub outcome: AttemptOutcome,
    pub failure_reason: Option<String>,
    pub charge_id: Option<String>,
    /// The `OrderPlaced` or `PaymentRetryRequested` event that started it.
    pub trigger_event_id: EventId,
    pub attempted_at: DateTime<Utc>,
}

/// Shared, append-only list of payment attempts.
///
/// The payment handler consults it before charging so that a redelivered
/// trigger never produces a second charge or a second terminal event.
#[derive(Debug, Clone, Default)]
pub struct PaymentLedger {
    attempts: Arc<RwLock<Vec<PaymentAttempt>>>,
}

impl PaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, attempt: PaymentAttempt) {
        self.attempts.write().await.push(attempt);
    }

    /// All attempts for an order, oldest first.
    pub async fn attempts_for(&self, order_id: AggregateId) -> Vec<PaymentAttempt> {
        self.attempts
            .read()
            .await
            .iter()
            .filter(|attempt| attempt.order_id == order_id)
            .cloned()
            .collect()
    }

    pub async fn has_succeeded(&self, order_id: AggregateId) -> bool {
        self.attempts
            .read()
            .await
            .iter()
            .any(|a| a.order_id == order_id && a.outcome == AttemptOutcome::Succeeded)
    }

    /// True if a charge was already made on behalf of this trigger event.
    pub async fn has_attempted(&self, trigger_event_id: EventId) -> bool {
        self.attempts
            .read()
            .await
            .iter()
            .any(|a| a.trigger_event_id == trigger_event_id)
    }

    pub async fn len(&self) -> usize {
        self.attempts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(order_id: AggregateId, trigger: EventId, outcome: AttemptOutcome) -> PaymentAttempt {
        PaymentAttempt {
            order_id,
            gateway_id: "test-gateway".to_string(),
            amount: Money::from_cents(1000),
            outcome,
            failure_reason: None,
            charge_id: None,
            trigger_event_id: trigger,
            attempted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn tracks_attempts_per_order_and_trigger() {
        let ledger = PaymentLedger::new();
        let order = AggregateId::new();
        let first = EventId::new();
        let retry = EventId::new();

        ledger.record(attempt(order, first, AttemptOutcome::Failed)).await;
        assert!(!ledger.has_succeeded(order).await);
        assert!(ledger.has_attempted(first).await);
        assert!(!ledger.has_attempted(retry).await);

        ledger.record(attempt(order, retry, AttemptOutcome::Succeeded)).await;
        ledger
            .record(attempt(AggregateId::new(), EventId::new(), AttemptOutcome::Failed))
            .await;

        assert!(ledger.has_succeeded(order).await);
        let attempts = ledger.attempts_for(order).await;
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Failed);
        assert_eq!(ledger.len().await, 3);
    }
}

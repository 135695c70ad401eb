//! Failure-path handler.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::EventId;
use event_bus::{BusEvent, EventHandler, HandlerError};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::events::CheckoutEvent;
use crate::services::{Notification, NotificationKind, NotificationService};

/// Reacts to the saga's unhappy endings.
///
/// A `PaymentFailed` notifies the customer so they can retry with another
/// payment method. An `InventoryShortfall` is surfaced to operators; the
/// payment stands and the order has to be resolved by hand.
pub struct CompensationHandler {
    notifications: Arc<dyn NotificationService>,
    /// Ids of the `PaymentFailed` and `InventoryShortfall` events acted on,
    /// so at most one entry per such event on the bus.
    handled: Mutex<HashSet<EventId>>,
}

impl CompensationHandler {
    pub fn new(notifications: Arc<dyn NotificationService>) -> Self {
        Self {
            notifications,
            handled: Mutex::new(HashSet::new()),
        }
    }

    async fn notify_payment_failed(&self, event: &CheckoutEvent, reason: &str) -> Result<()> {
        let snapshot = event.snapshot();
        tracing::info!(order_id = %snapshot.order_id, %reason, "notifying customer of failed payment");

        self.notifications
            .notify(Notification {
                order_id: snapshot.order_id,
                user_id: snapshot.user_id,
                kind: NotificationKind::PaymentFailed {
                    reason: reason.to_string(),
                },
            })
            .await
    }
}

#[async_trait]
impl EventHandler<CheckoutEvent> for CompensationHandler {
    fn name(&self) -> &'static str {
        "compensation"
    }

    async fn handle(&self, event: &CheckoutEvent) -> std::result::Result<(), HandlerError> {
        if self.handled.lock().await.contains(&event.event_id()) {
            return Ok(());
        }

        match event {
            CheckoutEvent::PaymentFailed { reason, .. } => {
                self.notify_payment_failed(event, reason).await?;
            }
            CheckoutEvent::InventoryShortfall {
                product_id,
                requested,
                available,
                ..
            } => {
                tracing::error!(
                    order_id = %event.order_id(),
                    %product_id,
                    requested,
                    available,
                    "paid order cannot be fully reserved, manual handling required"
                );
            }
            _ => return Ok(()),
        }

        // Marked only after success so a failed notification is retried.
        self.handled.lock().await.insert(event.event_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryNotificationService;
    use common::AggregateId;
    use domain::{Money, OrderSnapshot, UserId};

    #[tokio::test]
    async fn test_payment_failure_notifies_once() {
        let notifications = InMemoryNotificationService::new();
        let handler = CompensationHandler::new(Arc::new(notifications.clone()));
        let snapshot = OrderSnapshot {
            order_id: AggregateId::new(),
            user_id: UserId::new(),
            lines: vec![],
            total: Money::zero(),
        };
        let event = CheckoutEvent::payment_failed(EventId::new(), snapshot.clone(), "card_declined");

        handler.handle(&event).await.unwrap();
        handler.handle(&event).await.unwrap();

        let sent = notifications.sent_for(snapshot.order_id).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(handler.handled.lock().await.len(), 1);
        assert_eq!(
            sent[0].kind,
            NotificationKind::PaymentFailed {
                reason: "card_declined".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unrelated_events_are_not_tracked() {
        let notifications = InMemoryNotificationService::new();
        let handler = CompensationHandler::new(Arc::new(notifications.clone()));
        let snapshot = OrderSnapshot {
            order_id: AggregateId::new(),
            user_id: UserId::new(),
            lines: vec![],
            total: Money::zero(),
        };

        let succeeded = CheckoutEvent::payment_succeeded(EventId::new(), snapshot.clone(), "ch_1");
        handler.handle(&succeeded).await.unwrap();

        assert!(handler.handled.lock().await.is_empty());
        assert!(notifications.sent_for(snapshot.order_id).await.is_empty());
    }
}

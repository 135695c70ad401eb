//! Customer notification service trait and in-memory implementation.

use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::UserId;
use tokio::sync::RwLock;

use crate::error::SagaError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    OrderFulfilled,
    PaymentFailed { reason: String },
}

/// A message to send to the order's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub kind: NotificationKind,
}

/// Fire-and-forget delivery of customer notifications (email, webhook...).
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), SagaError>;
}

/// Records notifications instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    pub async fn sent_for(&self, order_id: AggregateId) -> Vec<Notification> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| n.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn notify(&self, notification: Notification) -> Result<(), SagaError> {
        tracing::debug!(order_id = %notification.order_id, kind = ?notification.kind, "notification sent");
        self.sent.write().await.push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_notifications_per_order() {
        let service = InMemoryNotificationService::new();
        let order_id = AggregateId::new();
        let user_id = UserId::new();

        service
            .notify(Notification {
                order_id,
                user_id,
                kind: NotificationKind::OrderFulfilled,
            })
            .await
            .unwrap();
        service
            .notify(Notification {
                order_id: AggregateId::new(),
                user_id,
                kind: NotificationKind::PaymentFailed {
                    reason: "card_declined".into(),
                },
            })
            .await
            .unwrap();

        assert_eq!(service.sent().await.len(), 2);
        let mine = service.sent_for(order_id).await;
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].kind, NotificationKind::OrderFulfilled);
    }
}

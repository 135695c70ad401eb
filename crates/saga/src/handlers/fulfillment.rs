//! Fulfillment handler.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{OrderService, OrderSnapshot, OrderStatus};
use event_bus::{EventHandler, HandlerError};
use event_store::EventStore;

use crate::error::Result;
use crate::events::CheckoutEvent;
use crate::services::{Notification, NotificationKind, NotificationService};

use super::{load_order, skip_stale};

/// Marks paid orders fulfilled and tells the customer.
pub struct FulfillmentHandler<S: EventStore> {
    orders: OrderService<S>,
    notifications: Arc<dyn NotificationService>,
}

impl<S: EventStore + Clone> FulfillmentHandler<S> {
    pub fn new(orders: OrderService<S>, notifications: Arc<dyn NotificationService>) -> Self {
        Self {
            orders,
            notifications,
        }
    }

    #[tracing::instrument(skip_all, fields(order_id = %snapshot.order_id))]
    async fn fulfill(&self, snapshot: &OrderSnapshot) -> Result<()> {
        let order_id = snapshot.order_id;
        let order = load_order(&self.orders, order_id).await?;
        if order.status() == OrderStatus::Fulfilled {
            tracing::debug!("order already fulfilled");
            return Ok(());
        }

        if skip_stale(self.orders.fulfill(order_id).await)?.is_none() {
            tracing::debug!(status = %order.status(), "order can no longer be fulfilled");
            return Ok(());
        }
        metrics::counter!("orders_fulfilled_total").increment(1);
        tracing::info!("order fulfilled");

        // Notifications are fire-and-forget once the order is fulfilled.
        let notification = Notification {
            order_id,
            user_id: snapshot.user_id,
            kind: NotificationKind::OrderFulfilled,
        };
        if let Err(error) = self.notifications.notify(notification).await {
            tracing::warn!(%error, "fulfillment notification failed");
        }
        Ok(())
    }
}

#[async_trait]
impl<S: EventStore + Clone + 'static> EventHandler<CheckoutEvent> for FulfillmentHandler<S> {
    fn name(&self) -> &'static str {
        "fulfillment"
    }

    async fn handle(&self, event: &CheckoutEvent) -> std::result::Result<(), HandlerError> {
        if let CheckoutEvent::PaymentSucceeded { snapshot, .. } = event {
            self.fulfill(snapshot).await?;
        }
        Ok(())
    }
}

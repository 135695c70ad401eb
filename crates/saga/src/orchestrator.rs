//! Checkout orchestrator: the synchronous entry point of the saga.

use common::AggregateId;
use domain::{
    DomainError, Order, OrderError, OrderLine, OrderService, OrderStatus, OutboxMessage, UserId,
};
use event_bus::{BusEvent, EventBus};
use event_store::EventStore;

use crate::cancellation::CancellationSignals;
use crate::error::{Result, SagaError};
use crate::events::CheckoutEvent;
use crate::token::PaymentToken;

/// Outbox message type under which each checkout's `OrderPlaced` is stored.
pub const ORDER_PLACED_OUTBOX: &str = "checkout.OrderPlaced";

/// What the caller gets back from a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutReceipt {
    pub order_id: AggregateId,
    pub status: OrderStatus,
}

/// Places orders and handles customer requests against them.
///
/// Validation errors are returned synchronously and never enter the saga.
/// Everything after placement happens asynchronously on the bus: a
/// successful checkout does not mean the order was paid.
pub struct CheckoutOrchestrator<S: EventStore> {
    orders: OrderService<S>,
    bus: EventBus<CheckoutEvent>,
    signals: CancellationSignals,
}

impl<S: EventStore + Clone> Clone for CheckoutOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            orders: self.orders.clone(),
            bus: self.bus.clone(),
            signals: self.signals.clone(),
        }
    }
}

impl<S: EventStore + Clone> CheckoutOrchestrator<S> {
    pub fn new(
        orders: OrderService<S>,
        bus: EventBus<CheckoutEvent>,
        signals: CancellationSignals,
    ) -> Self {
        Self {
            orders,
            bus,
            signals,
        }
    }

    /// Places an order for `items` and publishes `OrderPlaced`.
    ///
    /// The order and its `OrderPlaced` event are committed in one atomic
    /// append, the event as an outbox message; it is published only after
    /// that append commits. If the publish fails the checkout still succeeds
    /// and [`republish_pending_checkouts`](Self::republish_pending_checkouts)
    /// picks the event up later. Returns without waiting for payment.
    #[tracing::instrument(skip(self, items, payment_token), fields(items = items.len()))]
    pub async fn checkout(
        &self,
        user_id: UserId,
        items: Vec<OrderLine>,
        payment_token: &str,
    ) -> Result<CheckoutReceipt> {
        if items.is_empty() {
            return Err(SagaError::EmptyCart);
        }
        let token = PaymentToken::parse(payment_token)?;

        let order_id = AggregateId::new();
        let mut placed_event = None;
        let placed = self
            .orders
            .place_order_with_outbox(order_id, user_id, items, |order| {
                let snapshot = order.snapshot().ok_or(DomainError::AggregateNotFound {
                    aggregate_type: "Order",
                    aggregate_id: order_id,
                })?;
                let event = CheckoutEvent::order_placed(snapshot, token);
                let message = OutboxMessage::new(event.event_id(), ORDER_PLACED_OUTBOX, &event)?;
                placed_event = Some(event);
                Ok(vec![message])
            })
            .await?;
        let event = placed_event.ok_or(SagaError::OrderNotFound(order_id))?;
        let total = event.snapshot().total;

        metrics::counter!("checkout_orders_placed_total").increment(1);
        tracing::info!(%order_id, %total, "order placed");

        if let Err(error) = self.bus.publish(event).await {
            tracing::warn!(%order_id, %error, "OrderPlaced not published, left in outbox");
        }

        Ok(CheckoutReceipt {
            order_id,
            status: placed.aggregate.status(),
        })
    }

    /// Cancels an order that has not been paid yet.
    ///
    /// The status change happens first, so a payment settling concurrently
    /// either lands before it (and the cancel fails with an invalid
    /// transition) or finds the order cancelled. Handlers are then told to
    /// stand down and reservations are released.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: AggregateId, reason: &str) -> Result<OrderStatus> {
        let cancelled = self.orders.cancel(order_id, reason).await?;
        self.signals.raise(order_id).await;

        let snapshot = cancelled
            .aggregate
            .snapshot()
            .ok_or(SagaError::OrderNotFound(order_id))?;
        self.bus
            .publish(CheckoutEvent::cancellation_requested(snapshot, reason))
            .await?;

        tracing::info!(%order_id, %reason, "order cancelled");
        Ok(cancelled.aggregate.status())
    }

    /// Asks for another payment attempt on an order whose payment failed.
    #[tracing::instrument(skip(self, payment_token))]
    pub async fn retry_payment(&self, order_id: AggregateId, payment_token: &str) -> Result<()> {
        let token = PaymentToken::parse(payment_token)?;
        let order = self.order(order_id).await?;

        if order.status() != OrderStatus::PaymentFailed {
            return Err(OrderError::InvalidTransition {
                current: order.status(),
                action: "retry payment",
            }
            .into());
        }

        let snapshot = order.snapshot().ok_or(SagaError::OrderNotFound(order_id))?;
        self.bus
            .publish(CheckoutEvent::payment_retry_requested(snapshot, token))
            .await?;

        tracing::info!(%order_id, attempts = order.payment_attempts(), "payment retry requested");
        Ok(())
    }

    /// Publishes `OrderPlaced` again for every order that is still `Placed`
    /// but whose event never made it onto the bus, reading the event back
    /// from the outbox. Returns the number of events published.
    #[tracing::instrument(skip(self))]
    pub async fn republish_pending_checkouts(&self) -> Result<usize> {
        let mut republished = 0;

        for envelope in self.orders.handler().outbox(ORDER_PLACED_OUTBOX).await? {
            let event_id = envelope.event_id;
            if self.bus.any_published(|event| event.event_id() == event_id).await {
                continue;
            }
            if self.order_status(envelope.aggregate_id).await? != OrderStatus::Placed {
                continue;
            }

            let event: CheckoutEvent = envelope.decode().map_err(DomainError::from)?;
            self.bus.publish(event).await?;
            tracing::info!(order_id = %envelope.aggregate_id, "OrderPlaced republished from outbox");
            republished += 1;
        }

        Ok(republished)
    }

    pub async fn order_status(&self, order_id: AggregateId) -> Result<OrderStatus> {
        Ok(self.order(order_id).await?.status())
    }

    /// Loads the current state of an order.
    pub async fn order(&self, order_id: AggregateId) -> Result<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }
}

//! Payment saga handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::EventId;
use domain::{Order, OrderService, OrderSnapshot, OrderStatus};
use event_bus::{BusEvent, EventBus, EventHandler, HandlerError};
use event_store::EventStore;

use crate::cancellation::CancellationSignals;
use crate::error::Result;
use crate::events::CheckoutEvent;
use crate::ledger::{AttemptOutcome, PaymentAttempt, PaymentLedger};
use crate::services::{ChargeOutcome, ChargeRequest, PaymentGateway};
use crate::token::PaymentToken;

use super::{load_order, skip_stale};

/// Failure reason recorded when the gateway misses its deadline.
pub const TIMEOUT_REASON: &str = "timeout";

/// Charges the gateway for placed orders and publishes the outcome.
///
/// Handles `OrderPlaced` (first attempt) and `PaymentRetryRequested`.
/// Each trigger event produces at most one terminal `PaymentSucceeded` or
/// `PaymentFailed`: the ledger is checked before charging and the order's
/// compare-and-set transition to `PaymentPending` acts as a claim. The
/// handler never retries the gateway itself; a transport error is returned
/// to the bus, which redelivers.
///
/// If the order already settled but the terminal event for this trigger is
/// missing from the bus, the publish after the transition failed. The event
/// is rebuilt from the stored order and published without charging again.
pub struct PaymentSagaHandler<S: EventStore> {
    orders: OrderService<S>,
    gateway: Arc<dyn PaymentGateway>,
    ledger: PaymentLedger,
    signals: CancellationSignals,
    bus: EventBus<CheckoutEvent>,
    gateway_deadline: Duration,
}

impl<S: EventStore + Clone> PaymentSagaHandler<S> {
    pub fn new(
        orders: OrderService<S>,
        gateway: Arc<dyn PaymentGateway>,
        ledger: PaymentLedger,
        signals: CancellationSignals,
        bus: EventBus<CheckoutEvent>,
        gateway_deadline: Duration,
    ) -> Self {
        Self {
            orders,
            gateway,
            ledger,
            signals,
            bus,
            gateway_deadline,
        }
    }

    #[tracing::instrument(
        skip_all,
        fields(order_id = %trigger.order_id(), event_id = %trigger.event_id())
    )]
    async fn process(
        &self,
        trigger: &CheckoutEvent,
        token: &PaymentToken,
        awaiting: OrderStatus,
    ) -> Result<()> {
        let order_id = trigger.order_id();
        let trigger_id = trigger.event_id();

        if self.ledger.has_succeeded(order_id).await {
            tracing::debug!("order already paid");
            return Ok(());
        }
        if self.ledger.has_attempted(trigger_id).await {
            tracing::debug!("trigger already handled");
            return Ok(());
        }
        if self.signals.is_raised(order_id).await {
            tracing::info!("cancellation requested, not charging");
            return Ok(());
        }

        let order = load_order(&self.orders, order_id).await?;
        match order.status() {
            status if status == awaiting => {
                if skip_stale(self.orders.mark_payment_pending(order_id).await)?.is_none() {
                    tracing::debug!("another delivery claimed the attempt");
                    return Ok(());
                }
            }
            // A previous delivery claimed the attempt and stopped before
            // settling. The gateway deduplicates by order id.
            OrderStatus::PaymentPending => tracing::info!("resuming interrupted payment attempt"),
            OrderStatus::Paid | OrderStatus::PaymentFailed => {
                return self.republish_outcome(trigger, &order).await;
            }
            status => {
                tracing::debug!(%status, "order is not awaiting payment");
                return Ok(());
            }
        }

        let snapshot = trigger.snapshot().clone();
        let request = ChargeRequest {
            idempotency_key: order_id,
            token: token.clone(),
            amount: snapshot.total,
        };

        let charge = self.gateway.charge(request);
        let outcome = match tokio::time::timeout(self.gateway_deadline, charge).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(deadline = ?self.gateway_deadline, "payment gateway timed out");
                ChargeOutcome::Failed {
                    reason: TIMEOUT_REASON.to_string(),
                }
            }
        };

        let attempt = self.settle(trigger_id, snapshot, outcome).await?;
        let label = match attempt.outcome {
            AttemptOutcome::Succeeded => "succeeded",
            AttemptOutcome::Failed => "failed",
        };
        metrics::counter!("payment_attempts_total", "outcome" => label).increment(1);
        self.ledger.record(attempt).await;

        Ok(())
    }

    /// Moves the order to its post-payment status and publishes the
    /// terminal event. A charge that lands on an order cancelled in the
    /// meantime is refunded instead.
    async fn settle(
        &self,
        trigger_id: EventId,
        snapshot: OrderSnapshot,
        outcome: ChargeOutcome,
    ) -> Result<PaymentAttempt> {
        let order_id = snapshot.order_id;
        let attempt = self.attempt(trigger_id, &snapshot, &outcome);

        match outcome {
            ChargeOutcome::Succeeded { charge_id } => {
                if skip_stale(self.orders.mark_paid(order_id, &charge_id).await)?.is_some() {
                    tracing::info!(%charge_id, "payment succeeded");
                    self.bus
                        .publish(CheckoutEvent::payment_succeeded(trigger_id, snapshot, &charge_id))
                        .await?;
                } else {
                    let order = load_order(&self.orders, order_id).await?;
                    if order.status() == OrderStatus::Cancelled {
                        self.gateway.refund(&charge_id).await?;
                        tracing::warn!(%charge_id, "order cancelled during charge, refunded");
                    }
                }
            }
            ChargeOutcome::Failed { reason } => {
                if skip_stale(self.orders.mark_payment_failed(order_id, &reason).await)?.is_some() {
                    tracing::info!(%reason, "payment failed");
                    self.bus
                        .publish(CheckoutEvent::payment_failed(trigger_id, snapshot, reason))
                        .await?;
                }
            }
        }

        Ok(attempt)
    }

    async fn republish_outcome(&self, trigger: &CheckoutEvent, order: &Order) -> Result<()> {
        let order_id = trigger.order_id();
        let trigger_id = trigger.event_id();

        let published = self
            .bus
            .any_published(|event| {
                event.is_payment_outcome()
                    && event.order_id() == order_id
                    && event.header().caused_by == Some(trigger_id)
            })
            .await;
        let outcome = match (order.status(), order.charge_id(), order.last_failure()) {
            (OrderStatus::Paid, Some(charge_id), _) if !published => ChargeOutcome::Succeeded {
                charge_id: charge_id.to_string(),
            },
            (OrderStatus::PaymentFailed, _, Some(reason)) if !published => ChargeOutcome::Failed {
                reason: reason.to_string(),
            },
            (status, ..) => {
                tracing::debug!(%status, "order is not awaiting payment");
                return Ok(());
            }
        };

        let snapshot = trigger.snapshot().clone();
        let attempt = self.attempt(trigger_id, &snapshot, &outcome);
        let event = match outcome {
            ChargeOutcome::Succeeded { charge_id } => {
                CheckoutEvent::payment_succeeded(trigger_id, snapshot, charge_id)
            }
            ChargeOutcome::Failed { reason } => {
                CheckoutEvent::payment_failed(trigger_id, snapshot, reason)
            }
        };

        tracing::warn!(status = %order.status(), "payment settled without its event, republishing");
        self.bus.publish(event).await?;
        self.ledger.record(attempt).await;

        Ok(())
    }

    fn attempt(
        &self,
        trigger_id: EventId,
        snapshot: &OrderSnapshot,
        outcome: &ChargeOutcome,
    ) -> PaymentAttempt {
        let (outcome, failure_reason, charge_id) = match outcome {
            ChargeOutcome::Succeeded { charge_id } => {
                (AttemptOutcome::Succeeded, None, Some(charge_id.clone()))
            }
            ChargeOutcome::Failed { reason } => (AttemptOutcome::Failed, Some(reason.clone()), None),
        };

        PaymentAttempt {
            order_id: snapshot.order_id,
            gateway_id: self.gateway.id().to_string(),
            amount: snapshot.total,
            outcome,
            failure_reason,
            charge_id,
            trigger_event_id: trigger_id,
            attempted_at: Utc::now(),
        }
    }
}

#[async_trait]
impl<S: EventStore + Clone + 'static> EventHandler<CheckoutEvent> for PaymentSagaHandler<S> {
    fn name(&self) -> &'static str {
        "payment-saga"
    }

    async fn handle(&self, event: &CheckoutEvent) -> std::result::Result<(), HandlerError> {
        match event {
            CheckoutEvent::OrderPlaced { payment_token, .. } => {
                self.process(event, payment_token, OrderStatus::Placed).await?
            }
            CheckoutEvent::PaymentRetryRequested { payment_token, .. } => {
                self.process(event, payment_token, OrderStatus::PaymentFailed)
                    .await?
            }
            _ => {}
        }
        Ok(())
    }
}

//! Order aggregate implementation.

use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    Money, OrderError, OrderEvent, OrderLine, OrderSnapshot, OrderStatus, UserId,
    events::{OrderStartedData, PaymentRequestedData},
};

/// Order aggregate root.
///
/// Tracks an order from draft through payment to fulfillment or
/// cancellation. Lines and total are frozen once the order is placed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    user_id: Option<UserId>,

    status: OrderStatus,

    /// Lines in insertion order. Duplicate products stay separate.
    lines: Vec<OrderLine>,

    /// Always the sum of the line subtotals.
    total: Money,

    payment_attempts: u32,

    charge_id: Option<String>,

    last_failure: Option<String>,

    cancellation_reason: Option<String>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderStarted(data) => self.apply_order_started(data),
            OrderEvent::LinesAdded(data) => {
                self.lines.extend(data.lines);
                self.total = self.lines.iter().fold(Money::zero(), |total, line| {
                    Money::from_cents(total.cents().saturating_add(line.subtotal().cents()))
                });
            }
            OrderEvent::OrderPlaced(_) => {
                self.status = OrderStatus::Placed;
            }
            OrderEvent::PaymentRequested(data) => self.apply_payment_requested(data),
            OrderEvent::PaymentConfirmed(data) => {
                self.status = OrderStatus::Paid;
                self.charge_id = Some(data.charge_id);
            }
            OrderEvent::PaymentDeclined(data) => {
                self.status = OrderStatus::PaymentFailed;
                self.last_failure = Some(data.reason);
            }
            OrderEvent::OrderFulfilled(_) => {
                self.status = OrderStatus::Fulfilled;
            }
            OrderEvent::OrderCancelled(data) => {
                self.status = OrderStatus::Cancelled;
                self.cancellation_reason = Some(data.reason);
            }
        }
    }
}

// Query methods
impl Order {
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total(&self) -> Money {
        self.total
    }

    /// Number of payment attempts started so far.
    pub fn payment_attempts(&self) -> u32 {
        self.payment_attempts
    }

    /// Gateway reference of the successful charge, once paid.
    pub fn charge_id(&self) -> Option<&str> {
        self.charge_id.as_deref()
    }

    /// Reason given by the most recent failed payment attempt.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Copies the order's contents for publication on the bus.
    ///
    /// Returns `None` for an order that was never started.
    pub fn snapshot(&self) -> Option<OrderSnapshot> {
        Some(OrderSnapshot {
            order_id: self.id?,
            user_id: self.user_id?,
            lines: self.lines.clone(),
            total: self.total,
        })
    }
}

// Command methods (return events)
impl Order {
    /// Opens a draft order owned by `user_id`.
    pub fn start(
        &self,
        order_id: AggregateId,
        user_id: UserId,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyStarted);
        }

        Ok(vec![OrderEvent::order_started(order_id, user_id)])
    }

    /// Appends lines to a draft.
    ///
    /// Every line needs a positive quantity and a non-negative unit price, and
    /// the resulting total must fit in the money type. The batch is rejected
    /// as a whole on the first offending line.
    pub fn add_lines(&self, lines: Vec<OrderLine>) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_started()?;

        if !self.status.can_add_lines() {
            return Err(OrderError::InvalidState {
                current: self.status,
                action: "add lines",
                reason: "order is no longer a draft",
            });
        }

        if lines.is_empty() {
            return Ok(vec![]);
        }

        let mut total = self.total;
        for line in &lines {
            if line.quantity <= 0 {
                return Err(OrderError::invalid_line(
                    line,
                    format!("quantity must be greater than 0, got {}", line.quantity),
                ));
            }
            if line.unit_price.is_negative() {
                return Err(OrderError::invalid_line(
                    line,
                    format!("unit price must not be negative, got {}", line.unit_price),
                ));
            }
            total = line
                .checked_subtotal()
                .and_then(|subtotal| total.checked_add(subtotal))
                .ok_or_else(|| OrderError::invalid_line(line, "order total overflows"))?;
        }

        Ok(vec![OrderEvent::lines_added(lines)])
    }

    /// Freezes the order's contents.
    pub fn place(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_started()?;

        if !self.status.can_place() {
            return Err(OrderError::InvalidState {
                current: self.status,
                action: "place",
                reason: "order is not a draft",
            });
        }

        if self.lines.is_empty() {
            return Err(OrderError::InvalidState {
                current: self.status,
                action: "place",
                reason: "order has no lines",
            });
        }

        Ok(vec![OrderEvent::order_placed(self.total, self.lines.len())])
    }

    /// Starts a payment attempt.
    pub fn mark_payment_pending(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.transition(self.status.can_request_payment(), "request payment")?;
        Ok(vec![OrderEvent::payment_requested(self.payment_attempts + 1)])
    }

    /// Records a successful charge.
    pub fn mark_paid(&self, charge_id: impl Into<String>) -> Result<Vec<OrderEvent>, OrderError> {
        self.transition(self.status.can_settle_payment(), "mark paid")?;
        Ok(vec![OrderEvent::payment_confirmed(charge_id)])
    }

    /// Records a declined or timed-out charge.
    pub fn mark_payment_failed(
        &self,
        reason: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.transition(self.status.can_settle_payment(), "mark payment failed")?;
        Ok(vec![OrderEvent::payment_declined(reason)])
    }

    pub fn fulfill(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.transition(self.status.can_fulfill(), "fulfill")?;
        Ok(vec![OrderEvent::order_fulfilled()])
    }

    pub fn cancel(&self, reason: impl Into<String>) -> Result<Vec<OrderEvent>, OrderError> {
        self.transition(self.status.can_cancel(), "cancel")?;
        Ok(vec![OrderEvent::order_cancelled(reason)])
    }

    fn ensure_started(&self) -> Result<(), OrderError> {
        if self.id.is_none() {
            return Err(OrderError::NotStarted);
        }
        Ok(())
    }

    fn transition(&self, allowed: bool, action: &'static str) -> Result<(), OrderError> {
        self.ensure_started()?;
        if !allowed {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action,
            });
        }
        Ok(())
    }
}

// Apply event helpers
impl Order {
    fn apply_order_started(&mut self, data: OrderStartedData) {
        self.id = Some(data.order_id);
        self.user_id = Some(data.user_id);
        self.status = OrderStatus::Draft;
    }

    fn apply_payment_requested(&mut self, data: PaymentRequestedData) {
        self.status = OrderStatus::PaymentPending;
        self.payment_attempts = data.attempt;
        self.last_failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::DomainEvent;

    fn started_order() -> (Order, AggregateId) {
        let mut order = Order::default();
        let order_id = AggregateId::new();
        order
            .handle(|o| o.start(order_id, UserId::new()))
            .unwrap();
        (order, order_id)
    }

    fn placed_order() -> Order {
        let (mut order, _) = started_order();
        order
            .handle(|o| o.add_lines(vec![OrderLine::new("SKU-A", Money::from_cents(500), 2)]))
            .unwrap();
        order.handle(|o| o.place()).unwrap();
        order
    }

    #[test]
    fn test_start_order() {
        let (order, order_id) = started_order();
        assert_eq!(order.id(), Some(order_id));
        assert!(order.user_id().is_some());
        assert_eq!(order.status(), OrderStatus::Draft);
        assert!(order.lines().is_empty());
        assert_eq!(order.total(), Money::zero());
    }

    #[test]
    fn test_start_twice_fails() {
        let (order, _) = started_order();
        let result = order.start(AggregateId::new(), UserId::new());
        assert!(matches!(result, Err(OrderError::AlreadyStarted)));
    }

    #[test]
    fn test_commands_on_unstarted_order_fail() {
        let order = Order::default();
        assert!(matches!(order.place(), Err(OrderError::NotStarted)));
        assert!(matches!(order.cancel("x"), Err(OrderError::NotStarted)));
        assert!(order.snapshot().is_none());
    }

    #[test]
    fn test_add_lines_recomputes_total() {
        let (mut order, _) = started_order();
        order
            .handle(|o| {
                o.add_lines(vec![
                    OrderLine::new("SKU-A", Money::from_cents(500), 2),
                    OrderLine::new("SKU-B", Money::from_cents(250), 3),
                ])
            })
            .unwrap();
        order
            .handle(|o| o.add_lines(vec![OrderLine::new("SKU-A", Money::from_cents(100), 1)]))
            .unwrap();

        assert_eq!(order.lines().len(), 3);
        assert_eq!(order.total(), Money::from_cents(1000 + 750 + 100));
    }

    #[test]
    fn test_zero_price_line_is_accepted() {
        let (order, _) = started_order();
        let events = order
            .add_lines(vec![OrderLine::new("FREEBIE", Money::zero(), 1)])
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_invalid_lines_are_rejected() {
        let (order, _) = started_order();

        for line in [
            OrderLine::new("SKU-A", Money::from_cents(500), 0),
            OrderLine::new("SKU-A", Money::from_cents(500), -1),
            OrderLine::new("SKU-A", Money::from_cents(-1), 1),
            OrderLine::new("SKU-A", Money::from_cents(i64::MAX), 2),
        ] {
            let result = order.add_lines(vec![line]);
            assert!(
                matches!(result, Err(OrderError::InvalidLine { ref product_id, .. }) if product_id == "SKU-A"),
                "{result:?}"
            );
        }
    }

    #[test]
    fn test_total_overflow_across_lines_is_rejected() {
        let (order, _) = started_order();
        let result = order.add_lines(vec![
            OrderLine::new("SKU-A", Money::from_cents(i64::MAX), 1),
            OrderLine::new("SKU-B", Money::from_cents(1), 1),
        ]);
        assert!(matches!(result, Err(OrderError::InvalidLine { ref product_id, .. }) if product_id == "SKU-B"));
    }

    #[test]
    fn test_place_without_lines_fails() {
        let (order, _) = started_order();
        assert!(matches!(
            order.place(),
            Err(OrderError::InvalidState { action: "place", .. })
        ));
    }

    #[test]
    fn test_place_freezes_contents() {
        let order = placed_order();
        assert_eq!(order.status(), OrderStatus::Placed);

        let result = order.add_lines(vec![OrderLine::new("SKU-B", Money::from_cents(1), 1)]);
        assert!(matches!(
            result,
            Err(OrderError::InvalidState { current: OrderStatus::Placed, .. })
        ));
        assert!(matches!(order.place(), Err(OrderError::InvalidState { .. })));
    }

    #[test]
    fn test_payment_success_path() {
        let mut order = placed_order();

        order.handle(|o| o.mark_payment_pending()).unwrap();
        assert_eq!(order.status(), OrderStatus::PaymentPending);
        assert_eq!(order.payment_attempts(), 1);

        order.handle(|o| o.mark_paid("ch_123")).unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.charge_id(), Some("ch_123"));

        order.handle(|o| o.fulfill()).unwrap();
        assert_eq!(order.status(), OrderStatus::Fulfilled);
        assert!(order.is_terminal());
    }

    #[test]
    fn test_payment_failure_then_retry() {
        let mut order = placed_order();
        order.handle(|o| o.mark_payment_pending()).unwrap();
        order.handle(|o| o.mark_payment_failed("card_declined")).unwrap();

        assert_eq!(order.status(), OrderStatus::PaymentFailed);
        assert_eq!(order.last_failure(), Some("card_declined"));

        order.handle(|o| o.mark_payment_pending()).unwrap();
        assert_eq!(order.status(), OrderStatus::PaymentPending);
        assert_eq!(order.payment_attempts(), 2);
        assert_eq!(order.last_failure(), None);
    }

    #[test]
    fn test_settling_payment_requires_pending() {
        let order = placed_order();
        assert!(matches!(
            order.mark_paid("ch_1"),
            Err(OrderError::InvalidTransition { current: OrderStatus::Placed, action: "mark paid" })
        ));
        assert!(matches!(
            order.mark_payment_failed("x"),
            Err(OrderError::InvalidTransition { .. })
        ));
        assert!(matches!(order.fulfill(), Err(OrderError::InvalidTransition { .. })));
    }

    #[test]
    fn test_cancel_from_placed() {
        let mut order = placed_order();
        order.handle(|o| o.cancel("changed mind")).unwrap();

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.cancellation_reason(), Some("changed mind"));
        assert!(matches!(
            order.mark_payment_pending(),
            Err(OrderError::InvalidTransition { current: OrderStatus::Cancelled, .. })
        ));
    }

    #[test]
    fn test_cancel_fulfilled_fails() {
        let mut order = placed_order();
        order.handle(|o| o.mark_payment_pending()).unwrap();
        order.handle(|o| o.mark_paid("ch_1")).unwrap();
        order.handle(|o| o.fulfill()).unwrap();

        assert!(matches!(
            order.cancel("too late"),
            Err(OrderError::InvalidTransition { current: OrderStatus::Fulfilled, action: "cancel" })
        ));
    }

    #[test]
    fn test_cancel_draft_fails() {
        let (order, _) = started_order();
        assert!(matches!(order.cancel("x"), Err(OrderError::InvalidTransition { .. })));
    }

    #[test]
    fn test_snapshot_copies_contents() {
        let order = placed_order();
        let snapshot = order.snapshot().unwrap();

        assert_eq!(Some(snapshot.order_id), order.id());
        assert_eq!(Some(snapshot.user_id), order.user_id());
        assert_eq!(snapshot.lines, order.lines());
        assert_eq!(snapshot.total, Money::from_cents(1000));
    }

    #[test]
    fn test_replay_rebuilds_same_state() {
        let order_id = AggregateId::new();
        let user_id = UserId::new();
        let events = vec![
            OrderEvent::order_started(order_id, user_id),
            OrderEvent::lines_added(vec![OrderLine::new("SKU-A", Money::from_cents(500), 2)]),
            OrderEvent::order_placed(Money::from_cents(1000), 1),
            OrderEvent::payment_requested(1),
            OrderEvent::payment_declined("timeout"),
        ];
        assert_eq!(events[3].event_type(), "PaymentRequested");

        let mut order = Order::default();
        order.apply_events(events);

        assert_eq!(order.id(), Some(order_id));
        assert_eq!(order.user_id(), Some(user_id));
        assert_eq!(order.status(), OrderStatus::PaymentFailed);
        assert_eq!(order.total(), Money::from_cents(1000));
        assert_eq!(order.last_failure(), Some("timeout"));
    }
}

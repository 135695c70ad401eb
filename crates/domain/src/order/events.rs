//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{Money, OrderLine, UserId};

/// Events recorded on an order's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// A draft order was opened.
    OrderStarted(OrderStartedData),

    /// Lines were appended to a draft.
    LinesAdded(LinesAddedData),

    /// The order left draft; its contents are now frozen.
    OrderPlaced(OrderPlacedData),

    /// A payment attempt started.
    PaymentRequested(PaymentRequestedData),

    /// The gateway accepted the charge.
    PaymentConfirmed(PaymentConfirmedData),

    /// The gateway declined the charge or did not answer in time.
    PaymentDeclined(PaymentDeclinedData),

    /// The order was shipped.
    OrderFulfilled(OrderFulfilledData),

    /// The order was cancelled.
    OrderCancelled(OrderCancelledData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderStarted(_) => "OrderStarted",
            OrderEvent::LinesAdded(_) => "LinesAdded",
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::PaymentRequested(_) => "PaymentRequested",
            OrderEvent::PaymentConfirmed(_) => "PaymentConfirmed",
            OrderEvent::PaymentDeclined(_) => "PaymentDeclined",
            OrderEvent::OrderFulfilled(_) => "OrderFulfilled",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStartedData {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinesAddedData {
    pub lines: Vec<OrderLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub placed_at: DateTime<Utc>,

    /// Total at placement time.
    pub total: Money,

    pub line_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequestedData {
    pub requested_at: DateTime<Utc>,

    /// 1 for the first attempt, incremented on every retry.
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmedData {
    pub confirmed_at: DateTime<Utc>,

    /// Gateway reference for the successful charge.
    pub charge_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDeclinedData {
    pub declined_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFulfilledData {
    pub fulfilled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub cancelled_at: DateTime<Utc>,
    pub reason: String,
}

// Constructors stamping the current time.
impl OrderEvent {
    pub fn order_started(order_id: AggregateId, user_id: UserId) -> Self {
        OrderEvent::OrderStarted(OrderStartedData {
            order_id,
            user_id,
            started_at: Utc::now(),
        })
    }

    pub fn lines_added(lines: Vec<OrderLine>) -> Self {
        OrderEvent::LinesAdded(LinesAddedData { lines })
    }

    pub fn order_placed(total: Money, line_count: usize) -> Self {
        OrderEvent::OrderPlaced(OrderPlacedData {
            placed_at: Utc::now(),
            total,
            line_count,
        })
    }

    pub fn payment_requested(attempt: u32) -> Self {
        OrderEvent::PaymentRequested(PaymentRequestedData {
            requested_at: Utc::now(),
            attempt,
        })
    }

    pub fn payment_confirmed(charge_id: impl Into<String>) -> Self {
        OrderEvent::PaymentConfirmed(PaymentConfirmedData {
            confirmed_at: Utc::now(),
            charge_id: charge_id.into(),
        })
    }

    pub fn payment_declined(reason: impl Into<String>) -> Self {
        OrderEvent::PaymentDeclined(PaymentDeclinedData {
            declined_at: Utc::now(),
            reason: reason.into(),
        })
    }

    pub fn order_fulfilled() -> Self {
        OrderEvent::OrderFulfilled(OrderFulfilledData {
            fulfilled_at: Utc::now(),
        })
    }

    pub fn order_cancelled(reason: impl Into<String>) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            cancelled_at: Utc::now(),
            reason: reason.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        assert_eq!(
            OrderEvent::order_started(AggregateId::new(), UserId::new()).event_type(),
            "OrderStarted"
        );
        assert_eq!(OrderEvent::lines_added(vec![]).event_type(), "LinesAdded");
        assert_eq!(
            OrderEvent::order_placed(Money::zero(), 0).event_type(),
            "OrderPlaced"
        );
        assert_eq!(OrderEvent::payment_requested(1).event_type(), "PaymentRequested");
        assert_eq!(
            OrderEvent::payment_confirmed("ch_1").event_type(),
            "PaymentConfirmed"
        );
        assert_eq!(
            OrderEvent::payment_declined("card_declined").event_type(),
            "PaymentDeclined"
        );
        assert_eq!(OrderEvent::order_fulfilled().event_type(), "OrderFulfilled");
        assert_eq!(
            OrderEvent::order_cancelled("changed mind").event_type(),
            "OrderCancelled"
        );
    }

    #[test]
    fn test_serialization_is_adjacently_tagged() {
        let event = OrderEvent::payment_declined("timeout");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "PaymentDeclined");
        assert_eq!(json["data"]["reason"], "timeout");

        let back: OrderEvent = serde_json::from_value(json).unwrap();
        let OrderEvent::PaymentDeclined(data) = back else {
            panic!("expected PaymentDeclined");
        };
        assert_eq!(data.reason, "timeout");
    }

    #[test]
    fn test_lines_survive_serialization() {
        let event = OrderEvent::lines_added(vec![OrderLine::new("SKU-A", Money::from_cents(500), 2)]);
        let json = serde_json::to_string(&event).unwrap();
        let back: OrderEvent = serde_json::from_str(&json).unwrap();

        if let OrderEvent::LinesAdded(data) = back {
            assert_eq!(data.lines.len(), 1);
            assert_eq!(data.lines[0].product_id.as_str(), "SKU-A");
            assert_eq!(data.lines[0].quantity, 2);
        } else {
            panic!("expected LinesAdded");
        }
    }
}

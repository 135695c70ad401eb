//! Checkout events exchanged over the bus.

use chrono::{DateTime, Utc};
use common::{AggregateId, EventId};
use domain::{OrderSnapshot, ProductId};
use event_bus::BusEvent;
use serde::{Deserialize, Serialize};

use crate::token::PaymentToken;

/// Current schema version stamped on every checkout event.
pub const SCHEMA_VERSION: u16 = 1;

/// Metadata common to every checkout event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Unique per published event; redeliveries keep the same id.
    pub event_id: EventId,

    pub order_id: AggregateId,

    /// Id of the event whose handling produced this one, if any.
    pub caused_by: Option<EventId>,

    pub occurred_at: DateTime<Utc>,

    pub schema_version: u16,
}

impl EventHeader {
    pub fn new(order_id: AggregateId) -> Self {
        Self {
            event_id: EventId::new(),
            order_id,
            caused_by: None,
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn caused_by(order_id: AggregateId, cause: EventId) -> Self {
        Self {
            caused_by: Some(cause),
            ..Self::new(order_id)
        }
    }
}

/// Routing key of a checkout event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTag {
    OrderPlaced,
    PaymentSucceeded,
    PaymentFailed,
    InventoryShortfall,
    CancellationRequested,
    PaymentRetryRequested,
}

impl EventTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTag::OrderPlaced => "OrderPlaced",
            EventTag::PaymentSucceeded => "PaymentSucceeded",
            EventTag::PaymentFailed => "PaymentFailed",
            EventTag::InventoryShortfall => "InventoryShortfall",
            EventTag::CancellationRequested => "CancellationRequested",
            EventTag::PaymentRetryRequested => "PaymentRetryRequested",
        }
    }
}

impl std::fmt::Display for EventTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events of the checkout saga.
///
/// Every variant carries an immutable snapshot of the order taken when the
/// event was built, never a live reference to the aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CheckoutEvent {
    /// An order was committed in `Placed` status.
    OrderPlaced {
        header: EventHeader,
        snapshot: OrderSnapshot,
        payment_token: PaymentToken,
    },

    /// The gateway accepted the charge and the order is `Paid`.
    PaymentSucceeded {
        header: EventHeader,
        snapshot: OrderSnapshot,
        charge_id: String,
    },

    /// The gateway declined or timed out and the order is `PaymentFailed`.
    PaymentFailed {
        header: EventHeader,
        snapshot: OrderSnapshot,
        reason: String,
    },

    /// Stock could not cover a paid order. Needs manual handling.
    InventoryShortfall {
        header: EventHeader,
        snapshot: OrderSnapshot,
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// The order was cancelled; handlers should stand down.
    CancellationRequested {
        header: EventHeader,
        snapshot: OrderSnapshot,
        reason: String,
    },

    /// The customer asked to pay a failed order again.
    PaymentRetryRequested {
        header: EventHeader,
        snapshot: OrderSnapshot,
        payment_token: PaymentToken,
    },
}

impl CheckoutEvent {
    pub fn order_placed(snapshot: OrderSnapshot, payment_token: PaymentToken) -> Self {
        CheckoutEvent::OrderPlaced {
            header: EventHeader::new(snapshot.order_id),
            snapshot,
            payment_token,
        }
    }

    pub fn payment_succeeded(
        cause: EventId,
        snapshot: OrderSnapshot,
        charge_id: impl Into<String>,
    ) -> Self {
        CheckoutEvent::PaymentSucceeded {
            header: EventHeader::caused_by(snapshot.order_id, cause),
            snapshot,
            charge_id: charge_id.into(),
        }
    }

    pub fn payment_failed(
        cause: EventId,
        snapshot: OrderSnapshot,
        reason: impl Into<String>,
    ) -> Self {
        CheckoutEvent::PaymentFailed {
            header: EventHeader::caused_by(snapshot.order_id, cause),
            snapshot,
            reason: reason.into(),
        }
    }

    pub fn inventory_shortfall(
        cause: EventId,
        snapshot: OrderSnapshot,
        product_id: ProductId,
        requested: i64,
        available: i64,
    ) -> Self {
        CheckoutEvent::InventoryShortfall {
            header: EventHeader::caused_by(snapshot.order_id, cause),
            snapshot,
            product_id,
            requested,
            available,
        }
    }

    pub fn cancellation_requested(snapshot: OrderSnapshot, reason: impl Into<String>) -> Self {
        CheckoutEvent::CancellationRequested {
            header: EventHeader::new(snapshot.order_id),
            snapshot,
            reason: reason.into(),
        }
    }

    pub fn payment_retry_requested(snapshot: OrderSnapshot, payment_token: PaymentToken) -> Self {
        CheckoutEvent::PaymentRetryRequested {
            header: EventHeader::new(snapshot.order_id),
            snapshot,
            payment_token,
        }
    }

    pub fn header(&self) -> &EventHeader {
        match self {
            CheckoutEvent::OrderPlaced { header, .. }
            | CheckoutEvent::PaymentSucceeded { header, .. }
            | CheckoutEvent::PaymentFailed { header, .. }
            | CheckoutEvent::InventoryShortfall { header, .. }
            | CheckoutEvent::CancellationRequested { header, .. }
            | CheckoutEvent::PaymentRetryRequested { header, .. } => header,
        }
    }

    pub fn snapshot(&self) -> &OrderSnapshot {
        match self {
            CheckoutEvent::OrderPlaced { snapshot, .. }
            | CheckoutEvent::PaymentSucceeded { snapshot, .. }
            | CheckoutEvent::PaymentFailed { snapshot, .. }
            | CheckoutEvent::InventoryShortfall { snapshot, .. }
            | CheckoutEvent::CancellationRequested { snapshot, .. }
            | CheckoutEvent::PaymentRetryRequested { snapshot, .. } => snapshot,
        }
    }

    pub fn order_id(&self) -> AggregateId {
        self.header().order_id
    }

    /// True for the events that settle a payment attempt.
    pub fn is_payment_outcome(&self) -> bool {
        matches!(
            self,
            CheckoutEvent::PaymentSucceeded { .. } | CheckoutEvent::PaymentFailed { .. }
        )
    }
}

impl BusEvent for CheckoutEvent {
    type Tag = EventTag;

    fn tag(&self) -> EventTag {
        match self {
            CheckoutEvent::OrderPlaced { .. } => EventTag::OrderPlaced,
            CheckoutEvent::PaymentSucceeded { .. } => EventTag::PaymentSucceeded,
            CheckoutEvent::PaymentFailed { .. } => EventTag::PaymentFailed,
            CheckoutEvent::InventoryShortfall { .. } => EventTag::InventoryShortfall,
            CheckoutEvent::CancellationRequested { .. } => EventTag::CancellationRequested,
            CheckoutEvent::PaymentRetryRequested { .. } => EventTag::PaymentRetryRequested,
        }
    }

    fn event_id(&self) -> EventId {
        self.header().event_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Money, OrderLine, UserId};

    fn snapshot() -> OrderSnapshot {
        OrderSnapshot {
            order_id: AggregateId::new(),
            user_id: UserId::new(),
            lines: vec![OrderLine::new("A", Money::from_cents(500), 2)],
            total: Money::from_cents(1000),
        }
    }

    #[test]
    fn header_tracks_order_and_cause() {
        let placed = CheckoutEvent::order_placed(snapshot(), PaymentToken::parse("tok_1").unwrap());
        let succeeded =
            CheckoutEvent::payment_succeeded(placed.event_id(), placed.snapshot().clone(), "ch_1");

        assert_eq!(succeeded.order_id(), placed.order_id());
        assert_eq!(succeeded.header().caused_by, Some(placed.event_id()));
        assert_ne!(succeeded.event_id(), placed.event_id());
        assert_eq!(succeeded.header().schema_version, SCHEMA_VERSION);
        assert!(succeeded.is_payment_outcome());
        assert!(!placed.is_payment_outcome());
    }

    #[test]
    fn tags_match_variants() {
        let s = snapshot();
        let cause = EventId::new();
        let token = PaymentToken::parse("tok_1").unwrap();

        let cases = [
            (CheckoutEvent::order_placed(s.clone(), token.clone()), EventTag::OrderPlaced),
            (CheckoutEvent::payment_succeeded(cause, s.clone(), "ch"), EventTag::PaymentSucceeded),
            (CheckoutEvent::payment_failed(cause, s.clone(), "x"), EventTag::PaymentFailed),
            (
                CheckoutEvent::inventory_shortfall(cause, s.clone(), "A".into(), 2, 1),
                EventTag::InventoryShortfall,
            ),
            (
                CheckoutEvent::cancellation_requested(s.clone(), "x"),
                EventTag::CancellationRequested,
            ),
            (
                CheckoutEvent::payment_retry_requested(s, token),
                EventTag::PaymentRetryRequested,
            ),
        ];

        for (event, tag) in cases {
            assert_eq!(event.tag(), tag);
            assert_eq!(event.tag().to_string(), tag.as_str());
        }
    }

    #[test]
    fn serializes_as_tagged_variant_with_schema_version() {
        let event = CheckoutEvent::payment_failed(EventId::new(), snapshot(), "card_declined");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "PaymentFailed");
        assert_eq!(json["data"]["reason"], "card_declined");
        assert_eq!(json["data"]["header"]["schema_version"], 1);

        let back: CheckoutEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_id(), event.event_id());
    }
}

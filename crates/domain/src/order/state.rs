//! Order state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// ```text
/// Draft ──► Placed ──► PaymentPending ──► Paid ──► Fulfilled
///             │          │     ▲    │
///             │          │     │    ▼
///             │          │   PaymentFailed
///             │          │          │
///             └──────────┴──────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Lines can still be added.
    #[default]
    Draft,

    /// Contents are frozen; awaiting a payment attempt.
    Placed,

    /// A charge is in flight.
    PaymentPending,

    /// The charge succeeded.
    Paid,

    /// The last charge was declined or timed out. Payment may be retried.
    PaymentFailed,

    /// Terminal.
    Fulfilled,

    /// Terminal.
    Cancelled,
}

impl OrderStatus {
    pub fn can_add_lines(&self) -> bool {
        matches!(self, OrderStatus::Draft)
    }

    pub fn can_place(&self) -> bool {
        matches!(self, OrderStatus::Draft)
    }

    /// A payment attempt may start from a placed order or after a failure.
    pub fn can_request_payment(&self) -> bool {
        matches!(self, OrderStatus::Placed | OrderStatus::PaymentFailed)
    }

    pub fn can_settle_payment(&self) -> bool {
        matches!(self, OrderStatus::PaymentPending)
    }

    pub fn can_fulfill(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            OrderStatus::Placed | OrderStatus::PaymentPending | OrderStatus::PaymentFailed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Fulfilled | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "Draft",
            OrderStatus::Placed => "Placed",
            OrderStatus::PaymentPending => "PaymentPending",
            OrderStatus::Paid => "Paid",
            OrderStatus::PaymentFailed => "PaymentFailed",
            OrderStatus::Fulfilled => "Fulfilled",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//! Order aggregate and related types.

mod aggregate;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use events::{
    LinesAddedData, OrderCancelledData, OrderEvent, OrderFulfilledData, OrderPlacedData,
    OrderStartedData, PaymentConfirmedData, PaymentDeclinedData, PaymentRequestedData,
};
pub use service::{DEFAULT_CONFLICT_RETRIES, OrderService};
pub use state::OrderStatus;
pub use value_objects::{Money, OrderLine, OrderSnapshot, ProductId, UserId};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// A line failed validation.
    #[error("Invalid line for product {product_id}: {reason}")]
    InvalidLine { product_id: String, reason: String },

    /// The operation is not allowed while the order is in this status.
    #[error("Cannot {action} order in {current} status: {reason}")]
    InvalidState {
        current: OrderStatus,
        action: &'static str,
        reason: &'static str,
    },

    /// The lifecycle does not allow this transition.
    #[error("Invalid state transition: cannot {action} from {current} status")]
    InvalidTransition {
        current: OrderStatus,
        action: &'static str,
    },

    #[error("Order already started")]
    AlreadyStarted,

    #[error("Order has not been started")]
    NotStarted,
}

impl OrderError {
    fn invalid_line(line: &OrderLine, reason: impl Into<String>) -> Self {
        OrderError::InvalidLine {
            product_id: line.product_id.to_string(),
            reason: reason.into(),
        }
    }
}

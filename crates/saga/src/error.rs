//! Saga error types.

use common::AggregateId;
use domain::{DomainError, OrderError};
use event_bus::{BusError, HandlerError};
use thiserror::Error;

/// Errors that can occur during checkout and saga handling.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Checkout was called without any cart items.
    #[error("Cart is empty")]
    EmptyCart,

    /// The payment token failed format validation.
    #[error("Invalid payment token: {0}")]
    InvalidToken(String),

    /// Reserving stock would drive the product's count negative.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: i64,
        available: i64,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// The payment gateway could not be reached. Declines are not errors.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Shipping service error: {0}")]
    Shipping(String),

    #[error("Notification service error: {0}")]
    Notification(String),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),
}

impl SagaError {
    /// True for a transition the order's current status no longer allows,
    /// typically because a duplicate delivery or a cancellation got there
    /// first.
    pub fn is_stale_transition(&self) -> bool {
        matches!(
            self,
            SagaError::Domain(DomainError::Order(OrderError::InvalidTransition { .. }))
        )
    }
}

impl From<OrderError> for SagaError {
    fn from(error: OrderError) -> Self {
        SagaError::Domain(DomainError::Order(error))
    }
}

impl From<SagaError> for HandlerError {
    fn from(error: SagaError) -> Self {
        HandlerError::from_error(&error)
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use domain::OrderStatus;

    #[test]
    fn invalid_transition_is_stale() {
        let error = SagaError::from(OrderError::InvalidTransition {
            current: OrderStatus::Cancelled,
            action: "mark paid",
        });
        assert!(error.is_stale_transition());
        assert!(!SagaError::EmptyCart.is_stale_transition());
    }

    #[test]
    fn handler_error_keeps_message() {
        let error: HandlerError = SagaError::Gateway("connection reset".into()).into();
        assert_eq!(error.message(), "Payment gateway error: connection reset");
    }
}

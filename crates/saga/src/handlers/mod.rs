//! Bus subscribers that make up the checkout saga.
//!
//! Every handler is idempotent per event id and checks the order's
//! cancellation flag before doing anything with external effects.

pub mod compensation;
pub mod fulfillment;
pub mod inventory;
pub mod payment;
pub mod shipment;

pub use compensation::CompensationHandler;
pub use fulfillment::FulfillmentHandler;
pub use inventory::InventoryReservationHandler;
pub use payment::{PaymentSagaHandler, TIMEOUT_REASON};
pub use shipment::ShipmentTriggerHandler;

use common::AggregateId;
use domain::{DomainError, Order, OrderService};
use event_store::EventStore;

use crate::error::{Result, SagaError};

async fn load_order<S: EventStore>(orders: &OrderService<S>, order_id: AggregateId) -> Result<Order> {
    orders
        .get_order(order_id)
        .await?
        .ok_or(SagaError::OrderNotFound(order_id))
}

/// Maps a transition the order no longer allows to `None`.
///
/// Under at-least-once delivery that means another delivery, or a
/// cancellation, already moved the order on.
fn skip_stale<T>(result: std::result::Result<T, DomainError>) -> Result<Option<T>> {
    match result.map_err(SagaError::from) {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.is_stale_transition() => Ok(None),
        Err(error) => Err(error),
    }
}

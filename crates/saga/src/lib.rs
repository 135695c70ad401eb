//! Event-driven checkout saga.
//!
//! A checkout places an order atomically and publishes `OrderPlaced`. From
//! there the saga is pure choreography over the event bus:
//!
//! 1. the payment handler charges the gateway and publishes
//!    `PaymentSucceeded` or `PaymentFailed`
//! 2. on success, inventory reservation, fulfillment and shipment run
//!    independently of each other
//! 3. on failure, the customer is notified and may request a retry
//!
//! Handlers tolerate redelivery, check the order's cancellation flag before
//! acting, and turn integration failures (declines, timeouts, stock
//! shortfalls) into events instead of errors.
//!
//! Every state change commits before its event is published. A checkout
//! keeps its `OrderPlaced` in an outbox next to the order, and payment
//! outcomes can be rebuilt from the order, so an event lost to a failed
//! publish is recovered by [`SagaRuntime::recover`] or by redelivery.

pub mod cancellation;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod ledger;
pub mod orchestrator;
pub mod runtime;
pub mod services;
pub mod token;

pub use cancellation::CancellationSignals;
pub use config::SagaConfig;
pub use error::{Result, SagaError};
pub use events::{CheckoutEvent, EventHeader, EventTag, SCHEMA_VERSION};
pub use handlers::{
    CompensationHandler, FulfillmentHandler, InventoryReservationHandler, PaymentSagaHandler,
    ShipmentTriggerHandler, TIMEOUT_REASON,
};
pub use ledger::{AttemptOutcome, PaymentAttempt, PaymentLedger};
pub use orchestrator::{CheckoutOrchestrator, CheckoutReceipt, ORDER_PLACED_OUTBOX};
pub use runtime::{Collaborators, SagaRuntime};
pub use services::{
    ChargeOutcome, ChargeRequest, GatewayBehavior, InMemoryNotificationService,
    InMemoryPaymentGateway, InMemoryShippingService, InMemoryStockStore, Notification,
    NotificationKind, NotificationService, PaymentGateway, ReservationOutcome, ShipmentReceipt,
    ShippingService, StockReservation, StockStore,
};
pub use token::PaymentToken;

//! In-process event bus for saga choreography.
//!
//! The bus appends every published event to an in-memory log and fans it out
//! to the handlers subscribed to the event's tag. Delivery guarantees:
//!
//! - at-least-once per subscriber: handlers must tolerate redelivery
//! - deliveries to one subscriber are processed sequentially, different
//!   subscribers run concurrently with no relative ordering
//! - failed deliveries are retried with bounded exponential backoff, then
//!   routed to a dead-letter sink with a `HandlerExhausted` diagnostic
//!
//! A bus instance is created once, handed explicitly to every component that
//! publishes or subscribes, and shut down with [`EventBus::shutdown`].

pub mod bus;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod handler;

pub use bus::{DeliveryOutcome, EventBus, SubscriptionId};
pub use config::{BusConfig, RetryPolicy};
pub use dead_letter::{BusDiagnostic, DeadLetter, DeadLetterSink, InMemoryDeadLetterSink};
pub use error::{BusError, Result};
pub use event::BusEvent;
pub use handler::{EventHandler, HandlerError};

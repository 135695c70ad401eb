//! Domain layer for order checkout.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits for event-sourced entities
//! - CommandHandler, which persists command output with optimistic concurrency
//!   and commits outbox messages alongside it
//! - The Order aggregate with its lifecycle state machine

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{CommandHandler, CommandResult, OUTBOX_AGGREGATE_TYPE, OutboxMessage};
pub use error::DomainError;
pub use order::{
    DEFAULT_CONFLICT_RETRIES, Money, Order, OrderError, OrderEvent, OrderLine, OrderService,
    OrderSnapshot, OrderStatus, ProductId, UserId,
};

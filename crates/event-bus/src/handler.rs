//! Subscriber handler contract.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::BusEvent;

/// Failure reported by a handler.
///
/// Any error makes the bus retry the delivery; once the retry budget is
/// spent the event is dead-lettered.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wraps any error, keeping its rendered message.
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        Self::new(err.to_string())
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A subscriber that reacts to events of the tags it registered for.
#[async_trait]
pub trait EventHandler<E: BusEvent>: Send + Sync {
    /// Stable name used in logs, metrics and dead letters.
    fn name(&self) -> &'static str;

    /// Processes one delivery. Must be idempotent per event id.
    async fn handle(&self, event: &E) -> Result<(), HandlerError>;
}

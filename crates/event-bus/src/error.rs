//! Bus error types.

use common::EventId;
use thiserror::Error;

/// Errors returned by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has been shut down and accepts no more events or subscribers.
    #[error("Event bus is closed")]
    Closed,

    /// No logged event has the given id.
    #[error("Unknown event: {0}")]
    UnknownEvent(EventId),
}

/// Convenience type alias for bus results.
pub type Result<T> = std::result::Result<T, BusError>;

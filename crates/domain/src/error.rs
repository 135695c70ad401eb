//! Domain error types.

use common::AggregateId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the order aggregate.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Another writer appended to the stream after it was loaded.
    #[error("Concurrent modification of {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrentModification {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// No events exist for the aggregate.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// True when reloading and re-running the command may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::ConcurrentModification { .. })
    }
}

impl From<EventStoreError> for DomainError {
    fn from(error: EventStoreError) -> Self {
        match error {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => DomainError::ConcurrentModification {
                aggregate_id,
                expected,
                actual,
            },
            other => DomainError::EventStore(other),
        }
    }
}

//! Append-only event log backing order persistence.
//!
//! Every aggregate owns one stream of versioned events. Appends are atomic
//! per batch and guarded by an expected version, which gives callers the
//! compare-and-set semantics needed for optimistic concurrency.

pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use common::{AggregateId, EventId};
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, Version};
pub use memory::InMemoryEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt};

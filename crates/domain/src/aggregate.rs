//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events are immutable facts named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name recorded on the envelope.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates in an event-sourced system.
///
/// Aggregates are rebuilt by replaying their events. Command methods inspect
/// the current state and return new events; `apply` folds an event into the
/// state and must be pure and infallible.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns None for a new, uninitialized aggregate.
    fn id(&self) -> Option<AggregateId>;

    /// Version of the last applied event; 0 for a new aggregate.
    fn version(&self) -> Version;

    /// Called by the command handler after loading or appending events.
    fn set_version(&mut self, version: Version);

    /// Applies an event to the aggregate, updating its state.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Runs a command against the current state and applies what it emits.
    ///
    /// Lets a caller chain several commands in memory before persisting the
    /// combined events as one batch.
    fn handle<F>(&mut self, command_fn: F) -> Result<Vec<Self::Event>, Self::Error>
    where
        F: FnOnce(&Self) -> Result<Vec<Self::Event>, Self::Error>,
    {
        let events = command_fn(self)?;
        self.apply_events(events.iter().cloned());
        Ok(events)
    }
}

//! Command handling infrastructure.

use std::marker::PhantomData;

use common::{AggregateId, EventId};
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};
use serde::Serialize;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// Aggregate type stamped on outbox envelopes.
pub const OUTBOX_AGGREGATE_TYPE: &str = "Outbox";

/// A message committed in the same batch as an aggregate's events, for
/// publishing once the append has succeeded.
///
/// Outbox envelopes live in the aggregate's own stream and take part in its
/// versioning, but are never applied to the aggregate.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    pub message_id: EventId,
    pub message_type: String,
    pub payload: serde_json::Value,
}

impl OutboxMessage {
    pub fn new<T: Serialize>(
        message_id: EventId,
        message_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            message_id,
            message_type: message_type.into(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// Loads aggregates from the event store and persists the events commands
/// produce.
///
/// Every append carries the version the aggregate was loaded at. If another
/// writer got there first the store rejects the batch and the caller sees
/// [`DomainError::ConcurrentModification`].
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<fn() -> A>,
}

impl<S, A> Clone for CommandHandler<S, A>
where
    S: EventStore + Clone,
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate from the event store.
    ///
    /// If the aggregate doesn't exist, returns a default instance. Outbox
    /// envelopes advance the version without being applied.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let mut aggregate = A::default();

        for envelope in self.store.load(aggregate_id).await? {
            if envelope.aggregate_type == A::aggregate_type() {
                let event: A::Event = envelope.decode()?;
                aggregate.apply(event);
            }
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Runs a command against an existing aggregate and persists the result.
    ///
    /// Fails with [`DomainError::AggregateNotFound`] if the stream is empty.
    /// An empty event list is a no-op and nothing is written.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load_existing(aggregate_id).await?.ok_or(
            DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
            },
        )?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events,
                new_version: current_version,
            });
        }

        let envelopes = self.build_envelopes(aggregate_id, current_version, &events)?;
        let new_version = self
            .store
            .append(envelopes, AppendOptions::expect_version(current_version))
            .await?;

        aggregate.apply_events(events.iter().cloned());
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    /// Builds a new aggregate in memory and persists all of its events as one
    /// atomic batch.
    ///
    /// `build_fn` receives a fresh aggregate, mutates it through
    /// [`Aggregate::handle`] and returns every event it produced. Nothing is
    /// written if it fails, and the append is rejected if the stream already
    /// exists.
    pub async fn create<F>(
        &self,
        aggregate_id: AggregateId,
        build_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&mut A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.create_with_outbox(aggregate_id, build_fn, |_| Ok(Vec::new()))
            .await
    }

    /// Like [`create`](Self::create), but also commits the messages
    /// `outbox_fn` derives from the built aggregate in the same batch.
    pub async fn create_with_outbox<F, O>(
        &self,
        aggregate_id: AggregateId,
        build_fn: F,
        outbox_fn: O,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&mut A) -> Result<Vec<A::Event>, A::Error>,
        O: FnOnce(&A) -> Result<Vec<OutboxMessage>, DomainError>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = A::default();
        let events = build_fn(&mut aggregate)?;
        let messages = outbox_fn(&aggregate)?;

        let mut envelopes = self.build_envelopes(aggregate_id, Version::initial(), &events)?;
        let mut version = envelopes
            .last()
            .map_or(Version::initial(), |envelope| envelope.version);
        for message in messages {
            version = version.next();
            envelopes.push(
                EventEnvelope::builder()
                    .event_id(message.message_id)
                    .aggregate_id(aggregate_id)
                    .aggregate_type(OUTBOX_AGGREGATE_TYPE)
                    .event_type(message.message_type)
                    .version(version)
                    .payload_raw(message.payload)
                    .build()?,
            );
        }

        let new_version = self
            .store
            .append(envelopes, AppendOptions::expect_new())
            .await?;
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    /// Returns every committed outbox message of the given type, across all
    /// streams, in commit order.
    pub async fn outbox(&self, message_type: &str) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = self.store.events_by_type(message_type).await?;
        envelopes.retain(|envelope| envelope.aggregate_type == OUTBOX_AGGREGATE_TYPE);
        Ok(envelopes)
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let envelope = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?
                .build()?;
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}

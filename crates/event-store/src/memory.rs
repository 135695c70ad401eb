use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, validate_batch},
};

#[derive(Default)]
struct Log {
    /// Per-aggregate streams, each sorted by version.
    streams: HashMap<AggregateId, Vec<EventEnvelope>>,
    /// Every event in commit order.
    committed: Vec<EventEnvelope>,
}

impl Log {
    fn version_of(&self, aggregate_id: AggregateId) -> Version {
        self.streams
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map(|event| event.version)
            .unwrap_or_default()
    }
}

/// In-memory event store.
///
/// The write lock is held for the whole version check and append, so a batch
/// either lands completely at the expected version or not at all.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events in the log.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.committed.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_batch(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_version = events[0].version;

        let mut log = self.log.write().await;
        let current = log.version_of(aggregate_id);

        if let Some(expected) = options.expected_version
            && expected != current
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // Without an expected version the batch must still continue the stream.
        if first_version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: first_version,
                actual: current,
            });
        }

        let last_version = events[events.len() - 1].version;
        log.committed.extend(events.iter().cloned());
        log.streams.entry(aggregate_id).or_default().extend(events);

        metrics::counter!("event_store_appends_total").increment(1);
        tracing::trace!(%aggregate_id, version = %last_version, "events appended");

        Ok(last_version)
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log.streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let log = self.log.read().await;
        Ok(log
            .streams
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map(|event| event.version))
    }

    async fn events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log
            .committed
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect())
    }
}

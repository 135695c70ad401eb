use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Options controlling an append.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Version the stream must be at for the append to succeed.
    /// `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// No version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the stream to be at `version`.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Requires the stream to be empty.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// Storage contract for the append-only event log.
///
/// Implementations must make `append` atomic: the whole batch is written or
/// nothing is, and the expected-version check happens under the same lock or
/// transaction as the write.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events for a single aggregate and returns the new
    /// stream version.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Returns all events of an aggregate in version order.
    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>>;

    /// Returns the current stream version, or `None` if the stream is empty.
    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Returns every event with the given type across all streams, in commit
    /// order.
    async fn events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>>;
}

/// Convenience methods available on every [`EventStore`].
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event.
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    /// Returns true if the aggregate has at least one event.
    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.current_version(aggregate_id).await?.is_some())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch targets one aggregate with consecutive versions.
pub fn validate_batch(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected = first.version;
    for event in &events[1..] {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "all events in a batch must belong to the same aggregate".to_string(),
            ));
        }
        expected = expected.next();
        if event.version != expected {
            return Err(EventStoreError::InvalidAppend(format!(
                "versions must be consecutive: expected {expected}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(aggregate_id: AggregateId, version: u64) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type("Test")
            .aggregate_id(aggregate_id)
            .aggregate_type("Order")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            validate_batch(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn mixed_aggregates_are_rejected() {
        let batch = vec![
            envelope(AggregateId::new(), 1),
            envelope(AggregateId::new(), 2),
        ];
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn gaps_in_versions_are_rejected() {
        let id = AggregateId::new();
        let batch = vec![envelope(id, 1), envelope(id, 3)];
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn consecutive_batch_is_accepted() {
        let id = AggregateId::new();
        let batch = vec![envelope(id, 4), envelope(id, 5), envelope(id, 6)];
        assert!(validate_batch(&batch).is_ok());
    }
}

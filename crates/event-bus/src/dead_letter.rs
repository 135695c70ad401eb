//! Dead-letter sink and delivery diagnostics.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;
use tokio::sync::RwLock;

use crate::event::BusEvent;

/// An event a subscriber could not process within its retry budget.
#[derive(Debug, Clone)]
pub struct DeadLetter<E> {
    pub event: E,
    /// Name of the exhausted subscriber.
    pub subscriber: &'static str,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

/// Destination for dead letters awaiting operator intervention.
#[async_trait]
pub trait DeadLetterSink<E: BusEvent>: Send + Sync {
    async fn record(&self, letter: DeadLetter<E>);
}

/// Dead-letter sink that keeps letters in memory.
#[derive(Clone)]
pub struct InMemoryDeadLetterSink<E> {
    letters: Arc<RwLock<Vec<DeadLetter<E>>>>,
}

impl<E> Default for InMemoryDeadLetterSink<E> {
    fn default() -> Self {
        Self {
            letters: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<E: Clone> InMemoryDeadLetterSink<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded letter.
    pub async fn letters(&self) -> Vec<DeadLetter<E>> {
        self.letters.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.letters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.letters.read().await.is_empty()
    }
}

#[async_trait]
impl<E: BusEvent> DeadLetterSink<E> for InMemoryDeadLetterSink<E> {
    async fn record(&self, letter: DeadLetter<E>) {
        self.letters.write().await.push(letter);
    }
}

/// Operational signals emitted by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusDiagnostic {
    /// A subscriber spent its retry budget on an event; the event was
    /// dead-lettered.
    HandlerExhausted {
        subscriber: &'static str,
        event_id: EventId,
        tag: String,
        attempts: u32,
        last_error: String,
    },
}

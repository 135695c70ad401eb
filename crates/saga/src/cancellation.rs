//! Cooperative cancellation flags.

use std::collections::HashSet;
use std::sync::Arc;

use common::AggregateId;
use tokio::sync::RwLock;

/// Per-order cancellation flags shared by the orchestrator and the handlers.
///
/// Raising a flag does not interrupt anything in flight; handlers check it
/// before starting work with external effects.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignals {
    raised: Arc<RwLock<HashSet<AggregateId>>>,
}

impl CancellationSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn raise(&self, order_id: AggregateId) {
        self.raised.write().await.insert(order_id);
    }

    pub async fn is_raised(&self, order_id: AggregateId) -> bool {
        self.raised.read().await.contains(&order_id)
    }
}

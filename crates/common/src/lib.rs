//! Identifier types shared across the workspace.

mod types;

pub use types::{AggregateId, EventId};

#[doc(hidden)]
pub mod __private {
    pub use uuid::Uuid;
}

//! Contract for events carried by the bus.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use common::EventId;

/// An event that can travel over the bus.
///
/// Implementors are closed enums: `tag` names the variant and is the routing
/// key subscribers register for.
pub trait BusEvent: Clone + Send + Sync + 'static {
    /// The routing key type, usually a field-less mirror of the event enum.
    type Tag: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static;

    /// Returns the variant tag of this event.
    fn tag(&self) -> Self::Tag;

    /// Returns the unique id of this event.
    fn event_id(&self) -> EventId;
}

/// Declares a UUID-backed identifier newtype.
///
/// Each identifier gets its own type so order ids, event ids and the like
/// cannot be swapped by accident. The invoking crate must depend on `serde`.
#[macro_export]
macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($crate::__private::Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self($crate::__private::Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: $crate::__private::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> $crate::__private::Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$crate::__private::Uuid> for $name {
            fn from(uuid: $crate::__private::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for $crate::__private::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_identifier! {
    /// Identity of an aggregate instance (an order, in this system).
    ///
    /// Also used as the idempotency key handed to the payment gateway and
    /// the shipment service.
    AggregateId
}

uuid_identifier! {
    /// Unique identity of a single published or persisted event.
    ///
    /// Handlers use it to recognise redeliveries of the same event.
    EventId
}

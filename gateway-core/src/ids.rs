//! Opaque stable identifiers used across the gateway.
//!
//! Every identifier that spec.md calls "opaque" (capability ids, trace ids,
//! workflow ids, checkpoint ids) is a 128-bit UUID wrapped in a distinct
//! newtype, mirroring the teacher crate's `memory::NodeId`/`EdgeId` idiom of
//! never passing a bare `Uuid` across a component boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an identifier from its textual form.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// The underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

uuid_id!(CapabilityId, "Identifier of a [`crate::capability::Capability`].");
uuid_id!(TraceId, "Identifier of a [`crate::trace::Trace`].");
uuid_id!(WorkflowId, "Identifier of an active workflow.");
uuid_id!(CheckpointId, "Identifier of a workflow [`crate::executor::Checkpoint`].");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = CapabilityId::new();
        let parsed = CapabilityId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn distinct_id_types_do_not_coerce() {
        let cap = CapabilityId::new();
        let trace = TraceId::parse(&cap.to_string()).unwrap();
        // Same underlying UUID bytes, but a different Rust type -- this is
        // the point: callers cannot accidentally pass one for the other.
        assert_eq!(cap.as_uuid(), trace.as_uuid());
    }
}

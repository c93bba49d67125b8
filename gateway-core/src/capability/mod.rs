//! Capability Registry (C2): immutable identifiers, dedup by code-hash,
//! and named lookup over a dynamic set of recorded capabilities.

mod registry;
mod types;

pub use registry::{CapabilityRegistry, CapabilityStore, CreateArgs};
pub use types::{
    build_fqdn, validate_display_name, validate_fqdn_component, validate_short_hash, Capability,
    CapabilityRecord, Scope, Visibility,
};

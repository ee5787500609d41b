//! Payload construction and relationship enrichment.

/// Snapshot projection and the payload builder.
pub mod builder;
/// Conditional relationship loading.
pub mod relationships;

pub use builder::{build_snapshot, BuiltPayload, Payload, PayloadBuilder};
pub use relationships::{RelationshipOutcome, RelationshipStatus};

//! Relationship data access.

/// In-memory backend.
pub mod memory;
/// Loader trait and related-data types.
pub mod traits;

pub use memory::InMemoryRelationships;
pub use traits::{LoadError, NoRelationships, Record, Related, RelationshipLoader};

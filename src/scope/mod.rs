//! Scope definitions and the per-entity-type registry.

/// Relationship and action conditions.
pub mod condition;
/// Scope definition types and the registration input.
pub mod definition;
/// The scope registry.
pub mod registry;

pub use condition::{ActionCondition, Condition, Operator};
pub use definition::{
    ActionParam, ActionRule, RelationshipRule, ResolvedTemporalRule, ScopeDefinition, ScopeSpec,
    Snapshot, Stage, TemporalRule,
};
pub use registry::ScopeRegistry;

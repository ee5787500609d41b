//! # webhook-scopes - Scope-based change detection for entity commits
//!
//! Given an entity that a persistence commit has just mutated, the engine
//! decides which named *scopes* fired, reconstructs before/after values for
//! the fields each scope cares about, enriches the result with conditionally
//! loaded related data, notices expiry transitions driven by the clock, and
//! dispatches side-effecting actions.
//!
//! ## Core Concepts
//!
//! - **Scope**: a declared view of interesting change, with trigger fields,
//!   payload fields and a snapshot [`Stage`]
//! - **ChangeSet**: the changed/untracked/unchanged split of one scope's fields
//! - **Capability**: relationship enrichment, temporal rules and actions are
//!   opt-in per entity type and checked at registration
//! - **ScopeEvent**: a built payload handed to the delivery layer
//!
//! ## Usage
//!
//! ```rust,ignore
//! use webhook_scopes::{EntityState, FieldHistory, ScopeEngine, ScopeRegistry, Value};
//! use webhook_scopes::catalog::register_platform;
//!
//! let mut registry = ScopeRegistry::new();
//! register_platform(&mut registry)?;
//!
//! let (engine, events) = ScopeEngine::builder()
//!     .registry(registry)
//!     .register_action_handler("update_balance", UpdateBalance::new(pool))?
//!     .build_with_events()?;
//!
//! let tx = EntityState::loaded("Transaction", [("id", Value::Int(1)), ("type", "purchase".into())])
//!     .with_field("amount", FieldHistory::changed(Value::Int(10), Value::Int(25)));
//!
//! let report = engine.process_commit(&tx).await;
//! for event in events.drain() {
//!     deliver(event).await;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod entity;
pub mod error;
pub mod time;
pub mod value;

// Registration
pub mod config;
pub mod scope;

// Detection, payloads and actions
pub mod actions;
pub mod detect;
pub mod payload;
pub mod store;

// Hand-off and facade
pub mod emit;
pub mod engine;

// Platform scope tables
pub mod catalog;

// Re-export primary types at crate root for convenience
pub use entity::{Capabilities, Capability, EntityState, EntityType, EntityTypeId, FieldHistory};
pub use error::{ConfigurationError, EvaluationError, HandlerError, ScopeError, ScopeResult};
pub use value::Value;

pub use config::EngineConfig;
pub use scope::{
    ActionCondition, ActionParam, ActionRule, Condition, Operator, RelationshipRule,
    ScopeDefinition, ScopeRegistry, ScopeSpec, Snapshot, Stage, TemporalRule,
};

pub use actions::{ActionHandler, ActionInvocation, ActionOutcome, ActionRegistry, ActionStatus};
pub use detect::{
    CallbackOutcome, ChangeDetector, ChangeSet, DetectionReport, ExpirationCallback, FieldChange,
    TemporalCallbacks, TriggerOrigin, TriggeredScope,
};
pub use payload::{BuiltPayload, Payload, PayloadBuilder, RelationshipOutcome, RelationshipStatus};
pub use store::{InMemoryRelationships, LoadError, NoRelationships, Related, RelationshipLoader};

pub use emit::{EventSink, ScopeEvent, ScopeEventStream};
pub use engine::{CommitReport, ScopeEngine, ScopeEngineBuilder};

//! Error types for the scope engine.
//!
//! Errors are split along the line the engine draws between programming
//! mistakes and runtime conditions:
//!
//! - [`ConfigurationError`] is raised while entity types, scopes, handlers and
//!   callbacks are registered. These abort startup.
//! - [`EvaluationError`] describes a failure while processing one entity
//!   (a bad comparison, a relationship that would not load, a handler that
//!   failed). These are always recovered locally and reported through outcome
//!   values; they never reach the caller of the detection/payload API as `Err`.

use thiserror::Error;

use crate::entity::Capability;

/// Registration-time errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The entity type was never registered.
    #[error("Entity type '{entity_type}' is not registered")]
    UnknownEntityType {
        /// Entity type name.
        entity_type: String,
    },

    /// The entity type is registered twice.
    #[error("Entity type '{entity_type}' is already registered")]
    DuplicateEntityType {
        /// Entity type name.
        entity_type: String,
    },

    /// Two scopes share a full name.
    #[error("Scope '{scope}' is already registered for {entity_type}")]
    DuplicateScope {
        /// Full scope name.
        scope: String,
        /// Entity type name.
        entity_type: String,
    },

    /// A scope with no trigger fields.
    #[error("Scope '{scope}' must declare at least one trigger field")]
    EmptyTriggerFields {
        /// Full scope name.
        scope: String,
    },

    /// Trigger fields that are not columns.
    #[error("Invalid trigger fields for {scope}: {}", .fields.join(", "))]
    UnknownTriggerFields {
        /// Full scope name.
        scope: String,
        /// Offending field names.
        fields: Vec<String>,
    },

    /// Payload fields that are not columns.
    #[error("Invalid payload fields for {scope}: {}", .fields.join(", "))]
    UnknownPayloadFields {
        /// Full scope name.
        scope: String,
        /// Offending field names.
        fields: Vec<String>,
    },

    /// A relationship the entity type does not declare.
    #[error("Scope '{scope}' references unknown relationship '{relationship}'")]
    UnknownRelationship {
        /// Full scope name.
        scope: String,
        /// Relationship name.
        relationship: String,
    },

    /// A temporal rule on a missing column.
    #[error("Scope '{scope}' references temporal field '{field}' which is not a column")]
    UnknownTemporalField {
        /// Full scope name.
        scope: String,
        /// Field name.
        field: String,
    },

    /// A temporal rule firing a scope that is not registered yet.
    #[error("Scope '{scope}' fires unknown scope '{fires_scope}'")]
    UnknownFiresScope {
        /// Full scope name.
        scope: String,
        /// Target scope name.
        fires_scope: String,
    },

    /// A condition on a missing column.
    #[error("Scope '{scope}' condition references unknown field '{field}'")]
    UnknownConditionField {
        /// Full scope name.
        scope: String,
        /// Field name.
        field: String,
    },

    /// An action parameter mapping a missing column.
    #[error("Action '{action_type}' in scope '{scope}' maps unknown field '{field}'")]
    UnknownActionField {
        /// Full scope name.
        scope: String,
        /// Action type.
        action_type: String,
        /// Field name.
        field: String,
    },

    /// A feature the entity type does not support.
    #[error("Scope '{scope}' uses {capability} but {entity_type} does not support it")]
    CapabilityMissing {
        /// Full scope name.
        scope: String,
        /// Entity type name.
        entity_type: String,
        /// Capability the type lacks.
        capability: Capability,
    },

    /// A second handler for one action type.
    #[error("A handler for action type '{action_type}' is already registered")]
    DuplicateActionHandler {
        /// Action type.
        action_type: String,
    },

    /// A second expiration callback for one entity type.
    #[error("An expiration callback for {entity_type} is already registered")]
    DuplicateExpirationCallback {
        /// Entity type name.
        entity_type: String,
    },

    /// A condition expression that does not parse.
    #[error("Invalid condition '{expression}': {reason}")]
    InvalidCondition {
        /// Condition as written.
        expression: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Engine settings out of range.
    #[error("Invalid engine configuration: {reason}")]
    InvalidConfig {
        /// Why it was rejected.
        reason: String,
    },
}

/// Runtime, per-entity errors. Always recovered: the affected condition is
/// treated as not satisfied, the relationship is omitted, or the action is
/// reported as failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// The condition uses an unsupported operator.
    #[error("Unknown condition operator '{operator}'")]
    UnknownOperator {
        /// Operator token.
        operator: String,
    },

    /// The operands cannot be ordered.
    #[error("Cannot compare {left} {operator} {right}")]
    IncompatibleTypes {
        /// Operator token.
        operator: String,
        /// Type of the left operand.
        left: &'static str,
        /// Type of the right operand.
        right: &'static str,
    },

    /// The condition names a field the entity lacks.
    #[error("Field '{field}' is not present on the entity")]
    UnknownField {
        /// Field name.
        field: String,
    },

    /// The loader returned an error.
    #[error("Relationship '{relationship}' failed to load: {message}")]
    RelationshipLoad {
        /// Relationship name.
        relationship: String,
        /// Underlying error message.
        message: String,
    },

    /// A load or handler exceeded its timeout.
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Timeout in milliseconds.
        duration_ms: u64,
    },

    /// An action handler returned an error.
    #[error("Action '{action_type}' failed: {message}")]
    Handler {
        /// Action type.
        action_type: String,
        /// Underlying error message.
        message: String,
    },

    /// An action handler panicked.
    #[error("Action '{action_type}' panicked")]
    HandlerPanicked {
        /// Action type.
        action_type: String,
    },

    /// An expiration callback failed or panicked.
    #[error("Expiration callback for {entity_type} failed: {message}")]
    Callback {
        /// Entity type name.
        entity_type: String,
        /// Underlying error message.
        message: String,
    },
}

/// Error returned by action handlers and expiration callbacks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Top-level error type for the crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// Registration failed.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Processing one entity failed.
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// No scope has the requested name.
    #[error("Unknown scope: {scope}")]
    UnknownScope {
        /// Full scope name.
        scope: String,
    },

    /// Every sender of the event channel is gone.
    #[error("Channel disconnected: {path}")]
    Disconnected {
        /// Channel that disconnected.
        path: String,
    },

    /// Invariant violation inside the engine.
    #[error("Internal error: {message}")]
    Internal {
        /// Underlying error message.
        message: String,
    },
}

impl ScopeError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is an evaluation error.
    #[must_use]
    pub const fn is_evaluation(&self) -> bool {
        matches!(self, Self::Evaluation(_))
    }
}

/// Result type alias for scope engine operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

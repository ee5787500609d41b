//! Action dispatch.
//!
//! When a scope triggers, each of its action rules whose condition holds is
//! dispatched to the handler registered for the rule's type. Handlers run on
//! a spawned task under a timeout. A failing, panicking or slow handler is
//! reported in an [`ActionOutcome`] and logged; it never fails the caller and
//! is never retried.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::entity::{EntityState, EntityType, EntityTypeId};
use crate::error::{ConfigurationError, EvaluationError, HandlerError};
use crate::scope::{ActionParam, ActionRule, ScopeDefinition};
use crate::value::Value;

/// Everything a handler gets for one dispatch. Owned, so it can move onto the
/// handler's task.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionInvocation {
    /// Action type from the rule.
    pub action_type: String,
    /// Full name of the triggering scope.
    pub scope: String,
    /// Entity type of the mutated row.
    pub entity_type: EntityTypeId,
    /// Identity column value of the mutated row.
    pub entity_id: Value,
    /// Parameters resolved against the entity's current values.
    pub params: BTreeMap<String, Value>,
    /// The mutated entity.
    pub entity: EntityState,
}

impl ActionInvocation {
    /// One resolved parameter; null when absent.
    #[must_use]
    pub fn param(&self, name: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.params.get(name).unwrap_or(NULL)
    }
}

/// A side-effecting operation keyed by action type.
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    /// Performs the action.
    async fn handle(&self, invocation: &ActionInvocation) -> Result<(), HandlerError>;
}

/// Write-once table of action handlers.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: BTreeMap<String, Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("action_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `action_type`.
    ///
    /// # Errors
    ///
    /// Fails if a handler for that type is already registered.
    pub fn register_action_handler(
        &mut self,
        action_type: impl Into<String>,
        handler: impl ActionHandler,
    ) -> Result<(), ConfigurationError> {
        let action_type = action_type.into();
        if self.handlers.contains_key(&action_type) {
            return Err(ConfigurationError::DuplicateActionHandler { action_type });
        }
        self.handlers.insert(action_type, Arc::new(handler));
        Ok(())
    }

    /// The handler for `action_type`, if registered.
    #[must_use]
    pub fn get(&self, action_type: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_type)
    }

    /// Whether `action_type` has a handler.
    #[must_use]
    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }
}

/// Result of one action rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    /// The handler returned `Ok`.
    Completed,
    /// The condition evaluated to false.
    Skipped,
    /// The condition could not be evaluated and counts as false.
    ConditionError(EvaluationError),
    /// No handler is registered for the action type.
    NoHandler,
    /// The handler failed, panicked or timed out.
    Failed(EvaluationError),
}

/// What happened to one declared action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Action type from the rule.
    pub action_type: String,
    /// Scope that declared the action.
    pub scope: String,
    /// How the action ended.
    pub status: ActionStatus,
}

impl ActionOutcome {
    /// The handler ran and returned `Ok`.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ActionStatus::Completed
    }

    /// The handler failed, panicked or timed out.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.status, ActionStatus::Failed(_))
    }
}

/// Resolves parameters against the entity's current values. Missing columns
/// resolve to null.
#[must_use]
pub fn resolve_params(rule: &ActionRule, entity: &EntityState) -> BTreeMap<String, Value> {
    rule.params
        .iter()
        .map(|(name, param)| {
            let value = match param {
                ActionParam::Field(column) => entity.current(column).cloned().unwrap_or_default(),
                ActionParam::Value(value) => value.clone(),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Runs a triggered scope's actions.
#[derive(Debug, Clone, Copy)]
pub struct ActionExecutor<'a> {
    registry: &'a ActionRegistry,
    timeout: Duration,
}

impl<'a> ActionExecutor<'a> {
    /// An executor giving each handler `timeout` to finish.
    #[must_use]
    pub const fn new(registry: &'a ActionRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Runs every action rule of `scope` in declaration order.
    pub async fn run(
        &self,
        entity_type: &EntityType,
        scope: &ScopeDefinition,
        entity: &EntityState,
    ) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(scope.actions().len());
        for rule in scope.actions() {
            let status = self.run_one(entity_type, scope, rule, entity).await;
            outcomes.push(ActionOutcome {
                action_type: rule.action_type.clone(),
                scope: scope.name().to_string(),
                status,
            });
        }
        outcomes
    }

    async fn run_one(
        &self,
        entity_type: &EntityType,
        scope: &ScopeDefinition,
        rule: &ActionRule,
        entity: &EntityState,
    ) -> ActionStatus {
        if let Some(condition) = &rule.condition {
            match condition.evaluate(entity) {
                Ok(true) => {}
                Ok(false) => return ActionStatus::Skipped,
                Err(err) => {
                    warn!(
                        entity_type = %entity_type.id(),
                        scope = %scope.name(),
                        action_type = %rule.action_type,
                        error = %err,
                        "action condition could not be evaluated"
                    );
                    return ActionStatus::ConditionError(err);
                }
            }
        }

        let Some(handler) = self.registry.get(&rule.action_type) else {
            warn!(
                entity_type = %entity_type.id(),
                scope = %scope.name(),
                action_type = %rule.action_type,
                "no handler registered for action"
            );
            return ActionStatus::NoHandler;
        };

        let invocation = ActionInvocation {
            action_type: rule.action_type.clone(),
            scope: scope.name().to_string(),
            entity_type: entity_type.id().clone(),
            entity_id: entity
                .current(entity_type.identity_field())
                .cloned()
                .unwrap_or_default(),
            params: resolve_params(rule, entity),
            entity: entity.clone(),
        };

        match self.dispatch(Arc::clone(handler), invocation).await {
            Ok(()) => {
                debug!(
                    entity_type = %entity_type.id(),
                    scope = %scope.name(),
                    action_type = %rule.action_type,
                    "action completed"
                );
                ActionStatus::Completed
            }
            Err(err) => {
                error!(
                    entity_type = %entity_type.id(),
                    scope = %scope.name(),
                    action_type = %rule.action_type,
                    error = %err,
                    "action failed"
                );
                ActionStatus::Failed(err)
            }
        }
    }

    async fn dispatch(
        &self,
        handler: Arc<dyn ActionHandler>,
        invocation: ActionInvocation,
    ) -> Result<(), EvaluationError> {
        let action_type = invocation.action_type.clone();
        let mut task = tokio::spawn(async move { handler.handle(&invocation).await });

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(EvaluationError::Handler {
                action_type,
                message: err.message().to_string(),
            }),
            Ok(Err(join)) if join.is_panic() => Err(EvaluationError::HandlerPanicked { action_type }),
            Ok(Err(join)) => Err(EvaluationError::Handler {
                action_type,
                message: join.to_string(),
            }),
            Err(_) => {
                task.abort();
                Err(EvaluationError::Timeout {
                    operation: format!("action '{action_type}'"),
                    duration_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}

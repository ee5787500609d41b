//! Expiry-driven transitions.
//!
//! A temporal rule fires when a mutation moves its expiry column from a future
//! timestamp to null or to a timestamp at-or-before "now". The optional passive
//! sweep additionally reports expiries that no write observed.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::{EntityState, EntityTypeId};
use crate::error::{ConfigurationError, EvaluationError, HandlerError};
use crate::scope::{ResolvedTemporalRule, ScopeDefinition};
use crate::time::{crossed_expiry, is_expired};
use crate::value::Value;

use super::changes::{ChangeSet, FieldChange};

/// One temporal rule that fired for the current entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalFiring {
    /// Scope declaring the rule.
    pub declared_in: String,
    /// Scope the rule triggers.
    pub fires_scope: String,
    /// Synthetic changes: the expiry column and, if declared, the status transition.
    pub changes: BTreeMap<String, FieldChange>,
}

impl TemporalFiring {
    /// Writes the changes into `change_set` without overwriting existing entries.
    pub(crate) fn apply(&self, change_set: &mut ChangeSet) {
        for (field, change) in &self.changes {
            change_set.record_changed(field.clone(), change.clone());
        }
    }
}

fn status_transition(
    rule: &ResolvedTemporalRule,
    entity: &EntityState,
) -> Option<(String, FieldChange)> {
    let (field, target) = rule.status.as_ref()?;
    let current = entity.current(field).cloned().unwrap_or_default();
    if &current == target {
        return None;
    }
    Some((field.clone(), FieldChange::new(current, target.clone())))
}

/// Step 1 of detection for one scope: the rules that crossed their boundary.
pub(crate) fn write_observed(
    scope: &ScopeDefinition,
    entity: &EntityState,
    now: DateTime<Utc>,
) -> Vec<TemporalFiring> {
    scope
        .temporal_rules()
        .iter()
        .filter_map(|rule| {
            let history = entity.history(&rule.expires_at_field)?;
            if !history.touched || !crossed_expiry(&history.before, &history.after, now) {
                return None;
            }

            let mut changes = BTreeMap::new();
            changes.insert(
                rule.expires_at_field.clone(),
                FieldChange::new(history.before.clone(), history.after.clone()),
            );
            if let Some((field, change)) = status_transition(rule, entity) {
                changes.entry(field).or_insert(change);
            }

            Some(TemporalFiring {
                declared_in: scope.name().to_string(),
                fires_scope: rule.fires_scope.clone(),
                changes,
            })
        })
        .collect()
}

/// A passive expiry found by the sweep, seeded into a fresh change set.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PassiveExpiry {
    pub firing: TemporalFiring,
    pub seed: ChangeSet,
}

/// Passive sweep over one scope's rules. `triggered` names scopes that already
/// fired in this pass; rules whose declaring or target scope is among them are
/// skipped.
pub(crate) fn passive(
    scope: &ScopeDefinition,
    entity: &EntityState,
    now: DateTime<Utc>,
    triggered: impl Fn(&str) -> bool,
) -> Vec<PassiveExpiry> {
    if triggered(scope.name()) {
        return Vec::new();
    }

    scope
        .temporal_rules()
        .iter()
        .filter(|rule| rule.status.is_some() && !triggered(&rule.fires_scope))
        .filter_map(|rule| {
            let expires_at = entity.current(&rule.expires_at_field)?;
            if !is_expired(expires_at, now) {
                return None;
            }
            let (field, change) = status_transition(rule, entity)?;

            let mut seed = ChangeSet::new();
            seed.record_changed(field.clone(), change.clone());
            seed.record_unchanged(rule.expires_at_field.clone(), expires_at.clone());

            let mut changes = BTreeMap::new();
            changes.insert(
                rule.expires_at_field.clone(),
                FieldChange::new(expires_at.clone(), expires_at.clone()),
            );
            changes.insert(field, change);

            Some(PassiveExpiry {
                firing: TemporalFiring {
                    declared_in: scope.name().to_string(),
                    fires_scope: rule.fires_scope.clone(),
                    changes,
                },
                seed,
            })
        })
        .collect()
}

/// Synchronous hook invoked when a temporal rule fires for an entity type.
pub trait ExpirationCallback: Send + Sync {
    /// Called with the entity's identifier, the fired scope and the synthetic changes.
    ///
    /// # Errors
    ///
    /// Errors are logged by the engine and never propagated.
    fn on_expired(
        &self,
        entity_id: &Value,
        scope: &str,
        changes: &BTreeMap<String, FieldChange>,
    ) -> Result<(), HandlerError>;
}

impl<F> ExpirationCallback for F
where
    F: Fn(&Value, &str, &BTreeMap<String, FieldChange>) -> Result<(), HandlerError> + Send + Sync,
{
    fn on_expired(
        &self,
        entity_id: &Value,
        scope: &str,
        changes: &BTreeMap<String, FieldChange>,
    ) -> Result<(), HandlerError> {
        self(entity_id, scope, changes)
    }
}

/// Result of one expiration callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutcome {
    /// Entity type whose callback ran.
    pub entity_type: EntityTypeId,
    /// Scope of the temporal firing.
    pub scope: String,
    /// The callback's result; panics become errors.
    pub result: Result<(), EvaluationError>,
}

impl CallbackOutcome {
    /// The callback returned `Ok`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Write-once table of expiration callbacks, one per entity type.
#[derive(Clone, Default)]
pub struct TemporalCallbacks {
    callbacks: BTreeMap<EntityTypeId, Arc<dyn ExpirationCallback>>,
}

impl std::fmt::Debug for TemporalCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalCallbacks")
            .field("entity_types", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TemporalCallbacks {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the callback for an entity type.
    ///
    /// # Errors
    ///
    /// Fails if the entity type already has a callback.
    pub fn register(
        &mut self,
        entity_type: impl Into<EntityTypeId>,
        callback: impl ExpirationCallback + 'static,
    ) -> Result<(), ConfigurationError> {
        let entity_type = entity_type.into();
        if self.callbacks.contains_key(&entity_type) {
            return Err(ConfigurationError::DuplicateExpirationCallback {
                entity_type: entity_type.to_string(),
            });
        }
        self.callbacks.insert(entity_type, Arc::new(callback));
        Ok(())
    }

    /// Whether the entity type has a callback.
    #[must_use]
    pub fn contains(&self, entity_type: &EntityTypeId) -> bool {
        self.callbacks.contains_key(entity_type)
    }

    /// Invokes the callback for a firing. Returns `None` when the type has no
    /// callback. Errors and panics are captured in the outcome.
    pub(crate) fn invoke(
        &self,
        entity_type: &EntityTypeId,
        entity_id: &Value,
        firing: &TemporalFiring,
    ) -> Option<CallbackOutcome> {
        let callback = self.callbacks.get(entity_type)?;

        let result = catch_unwind(AssertUnwindSafe(|| {
            callback.on_expired(entity_id, &firing.fires_scope, &firing.changes)
        }));
        let result = match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(EvaluationError::Callback {
                entity_type: entity_type.to_string(),
                message: err.message().to_string(),
            }),
            Err(_) => Err(EvaluationError::Callback {
                entity_type: entity_type.to_string(),
                message: "callback panicked".to_string(),
            }),
        };

        Some(CallbackOutcome {
            entity_type: entity_type.clone(),
            scope: firing.fires_scope.clone(),
            result,
        })
    }
}

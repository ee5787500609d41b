//! Conditional relationship enrichment.
//!
//! Each declared relationship is gated by its condition (evaluated against the
//! entity's current values), loaded at most once per payload through the
//! [`RelationshipLoader`], projected, and attached under its name. Failures
//! never abort the payload: the key is omitted and the outcome says why.

use std::time::Duration;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error, warn};

use crate::entity::EntityState;
use crate::error::EvaluationError;
use crate::scope::{RelationshipRule, ScopeDefinition};
use crate::store::RelationshipLoader;

/// What happened to one declared relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipStatus {
    /// Loaded and attached.
    Included,
    /// The condition evaluated to false; nothing was loaded.
    ConditionNotMet,
    /// The condition could not be evaluated and counts as not met.
    ConditionError(EvaluationError),
    /// The loader reported no related data.
    Missing,
    /// Loading failed or timed out.
    Failed(EvaluationError),
}

/// Outcome of one relationship during payload construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipOutcome {
    /// Relationship name.
    pub relationship: String,
    /// What happened to it.
    pub status: RelationshipStatus,
}

impl RelationshipOutcome {
    /// The relationship was loaded and attached.
    #[must_use]
    pub fn is_included(&self) -> bool {
        self.status == RelationshipStatus::Included
    }
}

fn condition_holds(
    scope: &ScopeDefinition,
    name: &str,
    rule: &RelationshipRule,
    entity: &EntityState,
) -> Result<bool, EvaluationError> {
    let Some(condition) = &rule.condition else {
        return Ok(true);
    };
    condition.evaluate(entity).inspect_err(|err| {
        warn!(
            entity_type = %entity.entity_type(),
            scope = %scope.name(),
            relationship = %name,
            error = %err,
            "relationship condition could not be evaluated"
        );
    })
}

async fn load_one(
    loader: &dyn RelationshipLoader,
    scope: &ScopeDefinition,
    name: &str,
    rule: &RelationshipRule,
    entity: &EntityState,
    timeout: Duration,
) -> (RelationshipStatus, Option<JsonValue>) {
    match condition_holds(scope, name, rule, entity) {
        Ok(true) => {}
        Ok(false) => return (RelationshipStatus::ConditionNotMet, None),
        Err(err) => return (RelationshipStatus::ConditionError(err), None),
    }

    let failure = match tokio::time::timeout(timeout, loader.load(entity, name)).await {
        Ok(Ok(Some(related))) => {
            let projected = related.project(rule.fields.as_ref());
            return (RelationshipStatus::Included, Some(projected));
        }
        Ok(Ok(None)) => {
            debug!(
                entity_type = %entity.entity_type(),
                scope = %scope.name(),
                relationship = %name,
                "relationship has no related data"
            );
            return (RelationshipStatus::Missing, None);
        }
        Ok(Err(err)) => EvaluationError::RelationshipLoad {
            relationship: name.to_string(),
            message: err.to_string(),
        },
        Err(_) => EvaluationError::Timeout {
            operation: format!("relationship '{name}'"),
            duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        },
    };

    error!(
        entity_type = %entity.entity_type(),
        scope = %scope.name(),
        relationship = %name,
        error = %failure,
        "relationship omitted from payload"
    );
    (RelationshipStatus::Failed(failure), None)
}

/// Loads every declared relationship of `scope` and returns the attachments
/// together with one outcome per relationship.
pub(crate) async fn enrich(
    loader: &dyn RelationshipLoader,
    scope: &ScopeDefinition,
    entity: &EntityState,
    timeout: Duration,
) -> (Map<String, JsonValue>, Vec<RelationshipOutcome>) {
    let mut attached = Map::new();
    let mut outcomes = Vec::with_capacity(scope.relationships().len());

    for (name, rule) in scope.relationships() {
        let (status, data) = load_one(loader, scope, name, rule, entity, timeout).await;
        if let Some(data) = data {
            attached.insert(name.clone(), data);
        }
        outcomes.push(RelationshipOutcome {
            relationship: name.clone(),
            status,
        });
    }

    (attached, outcomes)
}

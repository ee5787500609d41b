//! Payload construction.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::detect::ChangeSet;
use crate::entity::EntityState;
use crate::scope::{ScopeDefinition, Snapshot, Stage};
use crate::store::RelationshipLoader;
use crate::value::Value;

use super::relationships::{enrich, RelationshipOutcome};

/// A built payload.
///
/// Serializes as a flat object for single-snapshot stages and as
/// `{"before": {...}, "after": {...}}` for [`Stage::Both`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Single snapshot for [`Stage::Before`] or [`Stage::After`].
    Snapshot(Map<String, JsonValue>),
    /// Both snapshots.
    Both {
        /// Pre-mutation snapshot.
        before: Map<String, JsonValue>,
        /// Post-mutation snapshot.
        after: Map<String, JsonValue>,
    },
}

impl Payload {
    /// The payload as a JSON value.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Snapshot(map) => JsonValue::Object(map.clone()),
            Self::Both { before, after } => {
                let mut out = Map::new();
                out.insert("before".to_string(), JsonValue::Object(before.clone()));
                out.insert("after".to_string(), JsonValue::Object(after.clone()));
                JsonValue::Object(out)
            }
        }
    }

    /// Consumes the payload into a JSON value.
    #[must_use]
    pub fn into_json(self) -> JsonValue {
        match self {
            Self::Snapshot(map) => JsonValue::Object(map),
            Self::Both { before, after } => {
                let mut out = Map::new();
                out.insert("before".to_string(), JsonValue::Object(before));
                out.insert("after".to_string(), JsonValue::Object(after));
                JsonValue::Object(out)
            }
        }
    }
}

/// A payload plus the outcome of every declared relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPayload {
    /// The payload, with relationships attached.
    pub payload: Payload,
    /// One outcome per declared relationship.
    pub relationships: Vec<RelationshipOutcome>,
}

/// Projects the scope's resolved fields for one side of the mutation.
///
/// Fields in `changed` or `untracked` take the requested side; everything
/// else takes the current value from the change set or the entity, or null
/// when neither has it.
#[must_use]
pub fn build_snapshot(
    scope: &ScopeDefinition,
    change_set: &ChangeSet,
    entity: &EntityState,
    which: Snapshot,
) -> Map<String, JsonValue> {
    scope
        .resolved_fields()
        .iter()
        .map(|field| {
            let value = change_set
                .value_at(field, which)
                .or_else(|| entity.current(field))
                .map_or(JsonValue::Null, Value::to_json);
            (field.clone(), value)
        })
        .collect()
}

/// Builds payloads, loading relationships through the configured loader.
#[derive(Clone, Copy)]
pub struct PayloadBuilder<'a> {
    loader: &'a dyn RelationshipLoader,
    relationship_timeout: Duration,
}

impl std::fmt::Debug for PayloadBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadBuilder")
            .field("relationship_timeout", &self.relationship_timeout)
            .finish_non_exhaustive()
    }
}

impl<'a> PayloadBuilder<'a> {
    /// A builder loading relationships through `loader`, each under `relationship_timeout`.
    #[must_use]
    pub fn new(loader: &'a dyn RelationshipLoader, relationship_timeout: Duration) -> Self {
        Self {
            loader,
            relationship_timeout,
        }
    }

    /// Builds the payload for `scope` at its declared stage.
    ///
    /// Relationships are loaded once and attached to every snapshot. Never
    /// fails: relationship problems are reported in the outcomes.
    pub async fn build(
        &self,
        scope: &ScopeDefinition,
        change_set: &ChangeSet,
        entity: &EntityState,
    ) -> BuiltPayload {
        let (attached, relationships) =
            enrich(self.loader, scope, entity, self.relationship_timeout).await;

        let snapshot = |which| {
            let mut map = build_snapshot(scope, change_set, entity, which);
            map.extend(attached.clone());
            map
        };

        let payload = match scope.stage() {
            Stage::Before => Payload::Snapshot(snapshot(Snapshot::Before)),
            Stage::After => Payload::Snapshot(snapshot(Snapshot::After)),
            Stage::Both => Payload::Both {
                before: snapshot(Snapshot::Before),
                after: snapshot(Snapshot::After),
            },
        };

        BuiltPayload {
            payload,
            relationships,
        }
    }
}

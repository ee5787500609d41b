//! Events handed to the delivery collaborator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::detect::TriggerOrigin;
use crate::entity::EntityTypeId;
use crate::scope::Stage;
use crate::value::Value;

/// One triggered scope with its built payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeEvent {
    /// Random v4 id, unique per event.
    pub event_id: Uuid,
    /// Entity type of the mutated row.
    pub entity_type: EntityTypeId,
    /// Identity column value of the mutated row.
    pub entity_id: Value,
    /// Full scope name.
    pub scope: String,
    /// Snapshots carried by the payload.
    pub stage: Stage,
    /// Why the scope fired.
    pub origin: TriggerOrigin,
    /// When the event was built.
    pub timestamp: DateTime<Utc>,
    /// Flat object, or `{"before": .., "after": ..}` for [`Stage::Both`].
    pub payload: serde_json::Value,
}

impl ScopeEvent {
    /// An event stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(
        entity_type: EntityTypeId,
        entity_id: Value,
        scope: impl Into<String>,
        stage: Stage,
        origin: TriggerOrigin,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            entity_type,
            entity_id,
            scope: scope.into(),
            stage,
            origin,
            timestamp: Utc::now(),
            payload,
        }
    }
}

//! In-memory relationship backend.
//!
//! Thread-safe [`RelationshipLoader`] for tests and embedded use. Related data
//! is keyed by entity type, the owning row's identity value and the
//! relationship name.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::entity::{EntityState, EntityTypeId};
use crate::store::traits::{LoadError, Related, RelationshipLoader};
use crate::value::Value;

fn lock_err(context: &'static str) -> LoadError {
    LoadError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    entity_type: EntityTypeId,
    entity_id: String,
    relationship: String,
}

impl Key {
    fn new(entity_type: &EntityTypeId, entity_id: &Value, relationship: &str) -> Self {
        Self {
            entity_type: entity_type.clone(),
            entity_id: entity_id.to_string(),
            relationship: relationship.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Data(Related),
    Failure(LoadError),
}

#[derive(Debug, Default)]
struct State {
    slots: HashMap<Key, Slot>,
    identity_fields: HashMap<EntityTypeId, String>,
    loads: usize,
}

/// In-memory [`RelationshipLoader`].
#[derive(Debug, Default)]
pub struct InMemoryRelationships {
    state: RwLock<State>,
    delay: Option<Duration>,
}

impl InMemoryRelationships {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every load, to exercise timeouts.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Overrides the identity column used to key rows of `entity_type` (default `id`).
    ///
    /// # Errors
    ///
    /// Fails if the internal lock is poisoned.
    pub fn set_identity_field(
        &self,
        entity_type: impl Into<EntityTypeId>,
        field: impl Into<String>,
    ) -> Result<(), LoadError> {
        let mut state = self.state.write().map_err(|_| lock_err("identity"))?;
        state.identity_fields.insert(entity_type.into(), field.into());
        Ok(())
    }

    /// Stores related data for one row.
    ///
    /// # Errors
    ///
    /// Fails if the internal lock is poisoned.
    pub fn insert(
        &self,
        entity_type: impl Into<EntityTypeId>,
        entity_id: impl Into<Value>,
        relationship: &str,
        related: Related,
    ) -> Result<(), LoadError> {
        let key = Key::new(&entity_type.into(), &entity_id.into(), relationship);
        let mut state = self.state.write().map_err(|_| lock_err("insert"))?;
        state.slots.insert(key, Slot::Data(related));
        Ok(())
    }

    /// Makes loads of one relationship fail with `error`.
    ///
    /// # Errors
    ///
    /// Fails if the internal lock is poisoned.
    pub fn fail(
        &self,
        entity_type: impl Into<EntityTypeId>,
        entity_id: impl Into<Value>,
        relationship: &str,
        error: LoadError,
    ) -> Result<(), LoadError> {
        let key = Key::new(&entity_type.into(), &entity_id.into(), relationship);
        let mut state = self.state.write().map_err(|_| lock_err("fail"))?;
        state.slots.insert(key, Slot::Failure(error));
        Ok(())
    }

    /// Number of loads served so far.
    ///
    /// # Errors
    ///
    /// Fails if the internal lock is poisoned.
    pub fn load_count(&self) -> Result<usize, LoadError> {
        let state = self.state.read().map_err(|_| lock_err("load_count"))?;
        Ok(state.loads)
    }

    fn lookup(&self, entity: &EntityState, relationship: &str) -> Result<Option<Related>, LoadError> {
        let mut state = self.state.write().map_err(|_| lock_err("load"))?;
        state.loads += 1;

        let identity = state
            .identity_fields
            .get(entity.entity_type())
            .map_or("id", String::as_str);
        let entity_id = entity.current(identity).cloned().unwrap_or_default();
        let key = Key::new(entity.entity_type(), &entity_id, relationship);

        match state.slots.get(&key) {
            Some(Slot::Data(related)) => Ok(Some(related.clone())),
            Some(Slot::Failure(error)) => Err(error.clone()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RelationshipLoader for InMemoryRelationships {
    async fn load(
        &self,
        entity: &EntityState,
        relationship: &str,
    ) -> Result<Option<Related>, LoadError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.lookup(entity, relationship)
    }
}

//! Persistence collaborator seams.
//!
//! The engine never talks to a database. Related-entity data is fetched
//! through a [`RelationshipLoader`] supplied by the persistence adapter; the
//! field history of the mutated entity arrives already materialized in an
//! [`EntityState`].

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use thiserror::Error;

use crate::entity::EntityState;
use crate::value::Value;

/// Column values of one related row.
pub type Record = BTreeMap<String, Value>;

/// Related data behind one relationship name.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// A to-one relationship.
    One(Record),
    /// A to-many relationship.
    Many(Vec<Record>),
}

impl Related {
    /// Projects the related data to JSON.
    ///
    /// With an allow-list, only listed fields present on the record are kept.
    /// Without one, every externally visible field is kept (names starting
    /// with `_` are private).
    #[must_use]
    pub fn project(&self, fields: Option<&BTreeSet<String>>) -> serde_json::Value {
        match self {
            Self::One(record) => project_record(record, fields),
            Self::Many(records) => serde_json::Value::Array(
                records.iter().map(|r| project_record(r, fields)).collect(),
            ),
        }
    }
}

fn project_record(record: &Record, fields: Option<&BTreeSet<String>>) -> serde_json::Value {
    let map = record
        .iter()
        .filter(|(name, _)| match fields {
            Some(allowed) => allowed.contains(name.as_str()),
            None => !name.starts_with('_'),
        })
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    serde_json::Value::Object(map)
}

/// Errors a relationship loader can report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The relationship is not known to the loader.
    #[error("Unknown relationship: {0}")]
    UnknownRelationship(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Async refresh-by-relationship-name.
///
/// `Ok(None)` means the relationship is currently empty (for example a null
/// foreign key); the payload then omits the key.
#[async_trait]
pub trait RelationshipLoader: Send + Sync {
    /// Loads the related data for `relationship` of `entity`.
    async fn load(&self, entity: &EntityState, relationship: &str)
        -> Result<Option<Related>, LoadError>;
}

/// Loader for deployments without relationship enrichment: always empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRelationships;

#[async_trait]
impl RelationshipLoader for NoRelationships {
    async fn load(
        &self,
        _entity: &EntityState,
        _relationship: &str,
    ) -> Result<Option<Related>, LoadError> {
        Ok(None)
    }
}

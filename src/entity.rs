//! Entity type descriptors and per-commit field history.
//!
//! An [`EntityType`] describes a persisted table as far as the scope engine is
//! concerned: its columns, its relationship names, its identity column and
//! the optional [`Capabilities`] it composes. An [`EntityState`] is the
//! field-history view of one row after a unit of work, filled in by the
//! persistence adapter.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Stable identifier of an entity type (for example `"Transaction"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityTypeId(String);

impl EntityTypeId {
    /// Creates an entity type id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityTypeId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for EntityTypeId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Optional behavior an entity type must opt into before its scopes may use it.
///
/// The scope registry and change detection are available to every entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Scopes may enrich payloads with related-entity data.
    Relationships,
    /// Scopes may declare expiry-driven temporal rules.
    Temporal,
    /// Scopes may declare side-effecting actions.
    Actions,
}

impl Capability {
    const fn bit(self) -> u8 {
        match self {
            Self::Relationships => 0b001,
            Self::Temporal => 0b010,
            Self::Actions => 0b100,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Relationships => "relationships",
            Self::Temporal => "temporal fields",
            Self::Actions => "actions",
        };
        f.write_str(name)
    }
}

/// The set of capabilities an entity type composes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    /// No optional capabilities.
    pub const NONE: Self = Self(0);

    /// Every optional capability.
    pub const ALL: Self = Self(0b111);

    /// Returns a copy with `capability` added.
    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Returns true if `capability` is supported.
    #[must_use]
    pub const fn supports(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

/// Descriptor of a persisted entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    id: EntityTypeId,
    scope_prefix: String,
    identity_field: String,
    columns: BTreeSet<String>,
    relationships: BTreeSet<String>,
    capabilities: Capabilities,
}

impl EntityType {
    /// Starts building an entity type with the given id and scope prefix.
    #[must_use]
    pub fn builder(id: impl Into<EntityTypeId>, scope_prefix: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            inner: Self {
                id: id.into(),
                scope_prefix: scope_prefix.into(),
                identity_field: "id".to_string(),
                columns: BTreeSet::new(),
                relationships: BTreeSet::new(),
                capabilities: Capabilities::NONE,
            },
        }
    }

    /// Type identifier.
    pub const fn id(&self) -> &EntityTypeId {
        &self.id
    }

    /// Prefix of every scope name for this type.
    pub fn scope_prefix(&self) -> &str {
        &self.scope_prefix
    }

    /// Column whose value identifies a row.
    pub fn identity_field(&self) -> &str {
        &self.identity_field
    }

    /// Declared columns.
    pub const fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    /// Declared relationship names.
    pub const fn relationships(&self) -> &BTreeSet<String> {
        &self.relationships
    }

    /// Supported scope features.
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether `name` is a declared column.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// Whether `name` is a declared relationship.
    #[must_use]
    pub fn has_relationship(&self, name: &str) -> bool {
        self.relationships.contains(name)
    }

    /// Whether scopes on this type may use `capability`.
    #[must_use]
    pub const fn supports(&self, capability: Capability) -> bool {
        self.capabilities.supports(capability)
    }

    /// Qualifies a local scope name with this type's prefix.
    ///
    /// Names that already carry the prefix are returned unchanged.
    #[must_use]
    pub fn qualify(&self, local: &str) -> String {
        let prefix = format!("{}.", self.scope_prefix);
        if local.starts_with(&prefix) {
            local.to_string()
        } else {
            format!("{prefix}{local}")
        }
    }
}

/// Builder for [`EntityType`].
#[derive(Debug, Clone)]
pub struct EntityTypeBuilder {
    inner: EntityType,
}

impl EntityTypeBuilder {
    /// Overrides the identity column (defaults to `id`).
    #[must_use]
    pub fn identity_field(mut self, name: impl Into<String>) -> Self {
        self.inner.identity_field = name.into();
        self
    }

    /// Adds columns.
    #[must_use]
    pub fn columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.columns.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds relationship names.
    #[must_use]
    pub fn relationships<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .relationships
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Composes an optional capability.
    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.inner.capabilities = self.inner.capabilities.with(capability);
        self
    }

    /// Finishes the descriptor. The identity column is always a column.
    #[must_use]
    pub fn build(mut self) -> EntityType {
        let identity = self.inner.identity_field.clone();
        self.inner.columns.insert(identity);
        self.inner
    }
}

/// Before/after record of one column during the current unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldHistory {
    /// Value before the unit of work.
    pub before: Value,
    /// Value after the unit of work (the current value).
    pub after: Value,
    /// Whether the column was written during the unit of work.
    pub touched: bool,
}

impl FieldHistory {
    /// A column that was not written.
    #[must_use]
    pub fn unchanged(value: Value) -> Self {
        Self {
            before: value.clone(),
            after: value,
            touched: false,
        }
    }

    /// A column that was written from `before` to `after`.
    #[must_use]
    pub fn changed(before: Value, after: Value) -> Self {
        Self {
            before,
            after,
            touched: true,
        }
    }

    /// True when the column was written and its value actually differs.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.touched && self.before != self.after
    }
}

/// Field-history view of one entity after a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    entity_type: EntityTypeId,
    fields: BTreeMap<String, FieldHistory>,
}

impl EntityState {
    /// An empty state for the given type.
    #[must_use]
    pub fn new(entity_type: impl Into<EntityTypeId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
        }
    }

    /// A row loaded from storage; nothing has been written yet.
    #[must_use]
    pub fn loaded<I, K, V>(entity_type: impl Into<EntityTypeId>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let fields = values
            .into_iter()
            .map(|(k, v)| (k.into(), FieldHistory::unchanged(v.into())))
            .collect();
        Self {
            entity_type: entity_type.into(),
            fields,
        }
    }

    /// A freshly inserted row: every column changed from null.
    #[must_use]
    pub fn inserted<I, K, V>(entity_type: impl Into<EntityTypeId>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let fields = values
            .into_iter()
            .map(|(k, v)| (k.into(), FieldHistory::changed(Value::Null, v.into())))
            .collect();
        Self {
            entity_type: entity_type.into(),
            fields,
        }
    }

    /// Sets the full history of one column.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, history: FieldHistory) -> Self {
        self.fields.insert(name.into(), history);
        self
    }

    /// Records a write. The first recorded `before` is kept across repeated writes.
    pub fn write(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        self.fields
            .entry(name.into())
            .and_modify(|h| {
                h.after = value.clone();
                h.touched = true;
            })
            .or_insert_with(|| FieldHistory::changed(Value::Null, value));
    }

    /// Type of the mutated row.
    pub const fn entity_type(&self) -> &EntityTypeId {
        &self.entity_type
    }

    /// History of one column, if the adapter provided it.
    #[must_use]
    pub fn history(&self, name: &str) -> Option<&FieldHistory> {
        self.fields.get(name)
    }

    /// Current (post-commit) value of one column.
    #[must_use]
    pub fn current(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).map(|h| &h.after)
    }

    /// Iterates over all tracked columns.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldHistory)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction_type() -> EntityType {
        EntityType::builder("Transaction", "transaction")
            .columns(["user_id", "amount", "type"])
            .relationships(["service"])
            .capability(Capability::Relationships)
            .build()
    }

    #[test]
    fn test_builder_adds_identity_column() {
        let ty = transaction_type();
        assert!(ty.has_column("id"));
        assert!(ty.has_column("amount"));
        assert!(!ty.has_column("service"));
        assert!(ty.has_relationship("service"));
    }

    #[test]
    fn test_capabilities() {
        let ty = transaction_type();
        assert!(ty.supports(Capability::Relationships));
        assert!(!ty.supports(Capability::Temporal));
        let all: Capabilities = [Capability::Relationships, Capability::Temporal, Capability::Actions]
            .into_iter()
            .collect();
        assert_eq!(all, Capabilities::ALL);
    }

    #[test]
    fn test_qualify() {
        let ty = transaction_type();
        assert_eq!(ty.qualify("amount"), "transaction.amount");
        assert_eq!(ty.qualify("transaction.amount"), "transaction.amount");
    }

    #[test]
    fn test_write_keeps_first_before() {
        let mut state = EntityState::loaded("Transaction", [("amount", 10)]);
        state.write("amount", 20);
        state.write("amount", 25);
        let h = state.history("amount").unwrap();
        assert_eq!(h.before, Value::Int(10));
        assert_eq!(h.after, Value::Int(25));
        assert!(h.has_changes());
    }

    #[test]
    fn test_write_back_to_original_is_not_a_change() {
        let mut state = EntityState::loaded("Transaction", [("amount", 10)]);
        state.write("amount", 10);
        assert!(!state.history("amount").unwrap().has_changes());
    }

    #[test]
    fn test_inserted_rows_change_from_null() {
        let state = EntityState::inserted("Transaction", [("amount", 10)]);
        let h = state.history("amount").unwrap();
        assert_eq!(h.before, Value::Null);
        assert!(h.has_changes());
        assert_eq!(state.current("amount"), Some(&Value::Int(10)));
    }
}

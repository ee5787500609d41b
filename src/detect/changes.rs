//! Change sets and the regular field sweep.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityState, EntityType};
use crate::scope::{ScopeDefinition, Snapshot};
use crate::value::Value;

/// Before/after pair of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Value before the mutation.
    pub before: Value,
    /// Value after the mutation.
    pub after: Value,
}

impl FieldChange {
    /// A change from `before` to `after`.
    #[must_use]
    pub fn new(before: impl Into<Value>, after: impl Into<Value>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }

    /// The value on one side of the mutation.
    #[must_use]
    pub const fn get(&self, snapshot: Snapshot) -> &Value {
        match snapshot {
            Snapshot::Before => &self.before,
            Snapshot::After => &self.after,
        }
    }
}

/// Categorized changes of one scope for one commit.
///
/// A field lives in at most one of the three maps. The first category a field
/// is recorded under wins; later records for the same field are ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Trigger fields with a real before/after difference, plus synthetic
    /// temporal transitions.
    pub changed: BTreeMap<String, FieldChange>,
    /// Non-trigger fields that changed.
    pub untracked: BTreeMap<String, FieldChange>,
    /// Current values of fields that did not change.
    pub unchanged: BTreeMap<String, Value>,
}

impl ChangeSet {
    /// An empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope triggers iff `changed` is non-empty.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        !self.changed.is_empty()
    }

    /// True if `field` is recorded in any category.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.changed.contains_key(field)
            || self.untracked.contains_key(field)
            || self.unchanged.contains_key(field)
    }

    /// Records a triggering change. Returns false if the field was already recorded.
    pub fn record_changed(&mut self, field: impl Into<String>, change: FieldChange) -> bool {
        let field = field.into();
        if self.contains(&field) {
            return false;
        }
        self.changed.insert(field, change);
        true
    }

    /// Records a non-trigger change. Returns false if the field was already recorded.
    pub fn record_untracked(&mut self, field: impl Into<String>, change: FieldChange) -> bool {
        let field = field.into();
        if self.contains(&field) {
            return false;
        }
        self.untracked.insert(field, change);
        true
    }

    /// Records an unchanged current value. Returns false if the field was already recorded.
    pub fn record_unchanged(&mut self, field: impl Into<String>, value: Value) -> bool {
        let field = field.into();
        if self.contains(&field) {
            return false;
        }
        self.unchanged.insert(field, value);
        true
    }

    /// Value of `field` on one side of the mutation. Unchanged fields have the
    /// same value on both sides.
    #[must_use]
    pub fn value_at(&self, field: &str, snapshot: Snapshot) -> Option<&Value> {
        self.changed
            .get(field)
            .or_else(|| self.untracked.get(field))
            .map(|change| change.get(snapshot))
            .or_else(|| self.unchanged.get(field))
    }

    /// Number of recorded fields across all categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changed.len() + self.untracked.len() + self.unchanged.len()
    }

    /// No field is recorded in any category.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a scope ended up in a detection report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    /// A trigger field was written with a different value.
    FieldWrite,
    /// A temporal rule crossed its expiry boundary during the mutation.
    TemporalTransition,
    /// The passive sweep found an expiry that no write observed.
    PassiveExpiry,
}

/// A scope that fired, with its change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredScope {
    /// Full scope name.
    pub name: String,
    /// Categorized fields that triggered the scope.
    pub change_set: ChangeSet,
    /// Why the scope fired.
    pub origin: TriggerOrigin,
}

/// Step 2 of detection: categorizes the scope's fields from field history.
///
/// Walks the resolved payload fields and the trigger fields. The identity field
/// always lands in `unchanged`. Fields already recorded (by the temporal
/// sweep) are left alone. Fields the adapter supplied no history for are
/// skipped.
pub(crate) fn sweep_fields(
    entity_type: &EntityType,
    scope: &ScopeDefinition,
    entity: &EntityState,
    change_set: &mut ChangeSet,
) {
    let identity = entity_type.identity_field();
    let fields = scope
        .resolved_fields()
        .iter()
        .chain(scope.trigger_fields().iter())
        .filter(|f| !entity_type.has_relationship(f));

    for field in fields {
        if change_set.contains(field) {
            continue;
        }
        let Some(history) = entity.history(field) else {
            continue;
        };

        if field == identity {
            change_set.record_unchanged(field.clone(), history.after.clone());
        } else if history.has_changes() {
            let change = FieldChange::new(history.before.clone(), history.after.clone());
            if scope.is_trigger(field) {
                change_set.record_changed(field.clone(), change);
            } else {
                change_set.record_untracked(field.clone(), change);
            }
        } else {
            change_set.record_unchanged(field.clone(), history.after.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::FieldHistory;
    use crate::scope::{ScopeRegistry, ScopeSpec};

    fn setup() -> (ScopeRegistry, EntityType) {
        let ty = EntityType::builder("Transaction", "transaction")
            .columns(["user_id", "amount", "type", "status"])
            .build();
        let mut registry = ScopeRegistry::new();
        registry.register_entity(ty.clone()).unwrap();
        (registry, ty)
    }

    fn amount_change() -> EntityState {
        EntityState::loaded(
            "Transaction",
            [
                ("id", Value::Int(1)),
                ("user_id", Value::Int(7)),
                ("type", Value::from("purchase")),
                ("status", Value::from("pending")),
            ],
        )
        .with_field("amount", FieldHistory::changed(Value::Int(10), Value::Int(25)))
    }

    #[test]
    fn test_record_is_exclusive_and_first_wins() {
        let mut cs = ChangeSet::new();
        assert!(cs.record_changed("status", FieldChange::new("active", "expired")));
        assert!(!cs.record_unchanged("status", Value::from("active")));
        assert!(!cs.record_changed("status", FieldChange::new("x", "y")));
        assert_eq!(cs.changed["status"].after, Value::from("expired"));
        assert_eq!(cs.len(), 1);
    }

    #[test]
    fn test_value_at() {
        let mut cs = ChangeSet::new();
        cs.record_changed("amount", FieldChange::new(10, 25));
        cs.record_unchanged("id", Value::Int(1));
        assert_eq!(cs.value_at("amount", Snapshot::Before), Some(&Value::Int(10)));
        assert_eq!(cs.value_at("amount", Snapshot::After), Some(&Value::Int(25)));
        assert_eq!(cs.value_at("id", Snapshot::Before), Some(&Value::Int(1)));
        assert_eq!(cs.value_at("missing", Snapshot::After), None);
    }

    #[test]
    fn test_sweep_categorizes_fields() {
        let (mut registry, ty) = setup();
        let scope = registry
            .register(
                ty.id(),
                ScopeSpec::new("amount", ["amount"]).payload_fields(["id", "user_id", "amount", "type"]),
            )
            .unwrap()
            .clone();

        let mut entity = amount_change();
        entity.write("type", "refund");

        let mut cs = ChangeSet::new();
        sweep_fields(&ty, &scope, &entity, &mut cs);

        assert_eq!(cs.changed["amount"], FieldChange::new(10, 25));
        assert_eq!(cs.untracked["type"], FieldChange::new("purchase", "refund"));
        assert_eq!(cs.unchanged["id"], Value::Int(1));
        assert_eq!(cs.unchanged["user_id"], Value::Int(7));
        assert!(!cs.contains("status"));
        assert!(cs.is_triggered());
    }

    #[test]
    fn test_trigger_outside_payload_still_triggers() {
        let (mut registry, ty) = setup();
        let scope = registry
            .register(ty.id(), ScopeSpec::new("amount", ["amount"]).payload_fields(["id"]))
            .unwrap()
            .clone();

        let mut cs = ChangeSet::new();
        sweep_fields(&ty, &scope, &amount_change(), &mut cs);
        assert!(cs.changed.contains_key("amount"));
    }

    #[test]
    fn test_identity_always_unchanged() {
        let (mut registry, ty) = setup();
        let scope = registry
            .register(ty.id(), ScopeSpec::new("created", ["id", "amount"]))
            .unwrap()
            .clone();

        let entity = EntityState::inserted("Transaction", [("id", 5), ("amount", 3)]);
        let mut cs = ChangeSet::new();
        sweep_fields(&ty, &scope, &entity, &mut cs);
        assert_eq!(cs.unchanged["id"], Value::Int(5));
        assert_eq!(cs.changed["amount"], FieldChange::new(Value::Null, 3));
    }

    #[test]
    fn test_write_back_does_not_trigger() {
        let (mut registry, ty) = setup();
        let scope = registry
            .register(ty.id(), ScopeSpec::new("status", ["status"]))
            .unwrap()
            .clone();

        let mut entity = amount_change();
        entity.write("status", "pending");
        let mut cs = ChangeSet::new();
        sweep_fields(&ty, &scope, &entity, &mut cs);
        assert!(!cs.is_triggered());
        assert_eq!(cs.unchanged["status"], Value::from("pending"));
    }

    #[test]
    fn test_prior_entries_not_overwritten() {
        let (mut registry, ty) = setup();
        let scope = registry
            .register(ty.id(), ScopeSpec::new("status", ["status"]))
            .unwrap()
            .clone();

        let mut cs = ChangeSet::new();
        cs.record_changed("status", FieldChange::new("pending", "expired"));
        sweep_fields(&ty, &scope, &amount_change(), &mut cs);
        assert_eq!(cs.changed["status"].after, Value::from("expired"));
        assert!(!cs.unchanged.contains_key("status"));
    }
}

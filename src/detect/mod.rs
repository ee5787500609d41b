//! Change detection.
//!
//! Given an entity's field history, the detector computes a [`ChangeSet`] per
//! registered scope and reports the scopes that fired. Within one scope the
//! temporal sweep always runs before the regular field sweep, and a field
//! recorded by the temporal sweep is never overwritten.

/// Change sets and the regular field sweep.
pub mod changes;
/// Expiry-driven transitions and expiration callbacks.
pub mod temporal;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::entity::{EntityState, EntityType};
use crate::scope::{ScopeDefinition, ScopeRegistry};
use crate::value::Value;

pub use changes::{ChangeSet, FieldChange, TriggerOrigin, TriggeredScope};
pub use temporal::{CallbackOutcome, ExpirationCallback, TemporalCallbacks, TemporalFiring};

use changes::sweep_fields;

/// Everything one detection pass produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionReport {
    /// Current value of the entity's identity column.
    pub entity_id: Value,
    /// Triggered scopes by namespaced name.
    pub scopes: BTreeMap<String, TriggeredScope>,
    /// Temporal rules that fired, write-observed first, then passive.
    pub firings: Vec<TemporalFiring>,
    /// One outcome per expiration callback invocation.
    pub callbacks: Vec<CallbackOutcome>,
}

impl DetectionReport {
    /// Nothing triggered and no callback ran.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Drops origins and returns the bare change sets.
    #[must_use]
    pub fn into_change_sets(self) -> BTreeMap<String, ChangeSet> {
        self.scopes
            .into_iter()
            .map(|(name, triggered)| (name, triggered.change_set))
            .collect()
    }
}

#[derive(Debug)]
struct Pass {
    scopes: BTreeMap<String, TriggeredScope>,
    firings: Vec<TemporalFiring>,
}

/// Computes triggered scopes for entities of registered types.
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector<'a> {
    registry: &'a ScopeRegistry,
    callbacks: &'a TemporalCallbacks,
    passive_sweep: bool,
}

impl<'a> ChangeDetector<'a> {
    /// A detector over `registry`, invoking `callbacks` for temporal firings.
    #[must_use]
    pub const fn new(registry: &'a ScopeRegistry, callbacks: &'a TemporalCallbacks) -> Self {
        Self {
            registry,
            callbacks,
            passive_sweep: false,
        }
    }

    /// Enables the passive expiry sweep.
    #[must_use]
    pub const fn with_passive_sweep(mut self, enabled: bool) -> Self {
        self.passive_sweep = enabled;
        self
    }

    /// The change set of one scope, whether or not it triggered.
    ///
    /// Pure: no callbacks run and the passive sweep is not applied. Returns
    /// `None` for unknown entity types or scopes.
    #[must_use]
    pub fn changes_for(
        &self,
        entity: &EntityState,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Option<ChangeSet> {
        let entity_type = self.registry.entity(entity.entity_type())?;
        let scopes = self.registry.get(entity.entity_type());
        let definition = scopes.get(scope)?;
        let firings = write_observed_firings(scopes, entity, now);
        Some(scope_changes(entity_type, definition, entity, &firings).0)
    }

    /// Runs a full detection pass and invokes expiration callbacks for every
    /// temporal firing. Callback failures are logged and reported, never raised.
    #[must_use]
    pub fn detect(&self, entity: &EntityState, now: DateTime<Utc>) -> DetectionReport {
        let Some(entity_type) = self.registry.entity(entity.entity_type()) else {
            return DetectionReport::default();
        };

        let entity_id = entity
            .current(entity_type.identity_field())
            .cloned()
            .unwrap_or_default();
        let pass = self.compute(entity_type, entity, now);

        for triggered in pass.scopes.values() {
            debug!(
                entity_type = %entity_type.id(),
                scope = %triggered.name,
                origin = ?triggered.origin,
                changed = triggered.change_set.changed.len(),
                "scope triggered"
            );
        }

        let callbacks = pass
            .firings
            .iter()
            .filter_map(|firing| self.callbacks.invoke(entity_type.id(), &entity_id, firing))
            .inspect(|outcome| {
                if let Err(err) = &outcome.result {
                    error!(
                        entity_type = %outcome.entity_type,
                        scope = %outcome.scope,
                        error = %err,
                        "expiration callback failed"
                    );
                }
            })
            .collect();

        DetectionReport {
            entity_id,
            scopes: pass.scopes,
            firings: pass.firings,
            callbacks,
        }
    }

    fn compute(&self, entity_type: &EntityType, entity: &EntityState, now: DateTime<Utc>) -> Pass {
        let scopes = self.registry.get(entity_type.id());
        let mut firings = write_observed_firings(scopes, entity, now);

        let mut triggered = BTreeMap::new();
        for definition in scopes.values() {
            let (change_set, from_temporal) = scope_changes(entity_type, definition, entity, &firings);
            if !change_set.is_triggered() {
                continue;
            }
            let origin = if from_temporal {
                TriggerOrigin::TemporalTransition
            } else {
                TriggerOrigin::FieldWrite
            };
            triggered.insert(
                definition.name().to_string(),
                TriggeredScope {
                    name: definition.name().to_string(),
                    change_set,
                    origin,
                },
            );
        }

        if self.passive_sweep {
            for definition in scopes.values() {
                let found = temporal::passive(definition, entity, now, |name| {
                    triggered.contains_key(name)
                });
                for expiry in found {
                    let target = expiry.firing.fires_scope.clone();
                    if triggered.contains_key(&target) {
                        continue;
                    }
                    let Some(target_definition) = scopes.get(&target) else {
                        continue;
                    };

                    let mut change_set = expiry.seed;
                    sweep_fields(entity_type, target_definition, entity, &mut change_set);
                    triggered.insert(
                        target.clone(),
                        TriggeredScope {
                            name: target,
                            change_set,
                            origin: TriggerOrigin::PassiveExpiry,
                        },
                    );
                    firings.push(expiry.firing);
                }
            }
        }

        Pass {
            scopes: triggered,
            firings,
        }
    }
}

fn write_observed_firings(
    scopes: &BTreeMap<String, ScopeDefinition>,
    entity: &EntityState,
    now: DateTime<Utc>,
) -> Vec<TemporalFiring> {
    scopes
        .values()
        .flat_map(|definition| temporal::write_observed(definition, entity, now))
        .collect()
}

/// Builds one scope's change set: its own temporal firings first, then
/// firings targeting it from other scopes, then the field sweep. The flag
/// reports whether any temporal change was recorded.
fn scope_changes(
    entity_type: &EntityType,
    definition: &ScopeDefinition,
    entity: &EntityState,
    firings: &[TemporalFiring],
) -> (ChangeSet, bool) {
    let name = definition.name();
    let mut change_set = ChangeSet::new();

    let own = firings.iter().filter(|f| f.declared_in == name);
    let incoming = firings
        .iter()
        .filter(|f| f.fires_scope == name && f.declared_in != name);
    for firing in own.chain(incoming) {
        firing.apply(&mut change_set);
    }
    let temporal = change_set.is_triggered();

    sweep_fields(entity_type, definition, entity, &mut change_set);
    (change_set, temporal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Capability, FieldHistory};
    use crate::error::HandlerError;
    use crate::scope::{ScopeSpec, Stage, TemporalRule};
    use chrono::Duration;
    use std::sync::{Arc, Mutex};

    fn registry() -> ScopeRegistry {
        let mut registry = ScopeRegistry::new();
        let ty = EntityType::builder("PurchasedItem", "purchased_item")
            .columns(["user_id", "status", "quantity", "expires_at"])
            .capability(Capability::Temporal)
            .build();
        let id = ty.id().clone();
        registry.register_entity(ty).unwrap();
        registry
            .register(&id, ScopeSpec::new("status", ["status"]).stage(Stage::Both))
            .unwrap();
        registry
            .register(
                &id,
                ScopeSpec::new("expiration", ["expires_at"])
                    .payload_fields(["id", "expires_at", "status"])
                    .temporal(
                        TemporalRule::new("expires_at")
                            .status("status", "expired")
                            .fires("status"),
                    ),
            )
            .unwrap();
        registry
            .register(&id, ScopeSpec::new("quantity", ["quantity"]))
            .unwrap();
        registry
    }

    fn item(expires: FieldHistory) -> EntityState {
        EntityState::loaded(
            "PurchasedItem",
            [
                ("id", Value::Int(9)),
                ("user_id", Value::Int(7)),
                ("status", Value::from("active")),
                ("quantity", Value::Int(1)),
            ],
        )
        .with_field("expires_at", expires)
    }

    #[test]
    fn test_expiry_triggers_declaring_and_target_scope() {
        let registry = registry();
        let callbacks = TemporalCallbacks::new();
        let now = Utc::now();
        let entity = item(FieldHistory::changed(
            Value::Timestamp(now + Duration::days(3)),
            Value::Null,
        ));

        let report = ChangeDetector::new(&registry, &callbacks).detect(&entity, now);
        assert_eq!(report.entity_id, Value::Int(9));
        assert_eq!(report.firings.len(), 1);

        let expiration = &report.scopes["purchased_item.expiration"];
        assert_eq!(expiration.origin, TriggerOrigin::TemporalTransition);
        assert_eq!(
            expiration.change_set.changed["status"],
            FieldChange::new("active", "expired")
        );
        assert_eq!(expiration.change_set.unchanged["id"], Value::Int(9));

        let status = &report.scopes["purchased_item.status"];
        assert_eq!(status.origin, TriggerOrigin::TemporalTransition);
        assert_eq!(status.change_set.changed["status"].after, Value::from("expired"));
        assert!(!report.scopes.contains_key("purchased_item.quantity"));
    }

    #[test]
    fn test_plain_write_triggers_only_matching_scope() {
        let registry = registry();
        let callbacks = TemporalCallbacks::new();
        let now = Utc::now();
        let mut entity = item(FieldHistory::unchanged(Value::Timestamp(now + Duration::days(3))));
        entity.write("quantity", 2);

        let report = ChangeDetector::new(&registry, &callbacks).detect(&entity, now);
        assert_eq!(report.scopes.len(), 1);
        let quantity = &report.scopes["purchased_item.quantity"];
        assert_eq!(quantity.origin, TriggerOrigin::FieldWrite);
        assert!(report.firings.is_empty());
    }

    #[test]
    fn test_callbacks_run_once_per_firing() {
        let registry = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut callbacks = TemporalCallbacks::new();
        callbacks
            .register(
                "PurchasedItem",
                move |id: &Value, scope: &str, _: &BTreeMap<String, FieldChange>| -> Result<(), HandlerError> {
                    sink.lock().unwrap().push((id.clone(), scope.to_string()));
                    Ok(())
                },
            )
            .unwrap();

        let now = Utc::now();
        let entity = item(FieldHistory::changed(
            Value::Timestamp(now + Duration::hours(1)),
            Value::Timestamp(now - Duration::minutes(1)),
        ));
        let report = ChangeDetector::new(&registry, &callbacks).detect(&entity, now);

        assert_eq!(report.callbacks.len(), 1);
        assert!(report.callbacks[0].is_ok());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Value::Int(9), "purchased_item.status".to_string())]
        );
    }

    #[test]
    fn test_passive_sweep_is_opt_in() {
        let registry = registry();
        let callbacks = TemporalCallbacks::new();
        let now = Utc::now();
        let entity = item(FieldHistory::unchanged(Value::Timestamp(now - Duration::days(1))));

        let off = ChangeDetector::new(&registry, &callbacks).detect(&entity, now);
        assert!(off.is_empty());

        let on = ChangeDetector::new(&registry, &callbacks)
            .with_passive_sweep(true)
            .detect(&entity, now);
        let status = &on.scopes["purchased_item.status"];
        assert_eq!(status.origin, TriggerOrigin::PassiveExpiry);
        assert_eq!(status.change_set.changed["status"], FieldChange::new("active", "expired"));
        assert_eq!(on.firings.len(), 1);
    }

    #[test]
    fn test_changes_for_is_pure_and_covers_untriggered_scopes() {
        let registry = registry();
        let callbacks = TemporalCallbacks::new();
        let now = Utc::now();
        let entity = item(FieldHistory::unchanged(Value::Null));
        let detector = ChangeDetector::new(&registry, &callbacks);

        let cs = detector
            .changes_for(&entity, "purchased_item.quantity", now)
            .unwrap();
        assert!(!cs.is_triggered());
        assert_eq!(cs.unchanged["quantity"], Value::Int(1));
        assert!(detector.changes_for(&entity, "purchased_item.nope", now).is_none());
    }

    #[test]
    fn test_unknown_entity_type_yields_empty_report() {
        let registry = registry();
        let callbacks = TemporalCallbacks::new();
        let entity = EntityState::loaded("Ghost", [("id", 1)]);
        let report = ChangeDetector::new(&registry, &callbacks).detect(&entity, Utc::now());
        assert!(report.is_empty());
        assert_eq!(report.into_change_sets().len(), 0);
    }
}

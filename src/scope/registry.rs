//! Per-entity-type scope table.
//!
//! The registry is populated once during process wiring (`&mut self`) and then
//! shared read-only, usually behind an `Arc`. There is no removal operation.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::entity::{Capability, EntityType, EntityTypeId};
use crate::error::ConfigurationError;

use super::condition::Operator;
use super::definition::{ActionParam, ResolvedTemporalRule, ScopeDefinition, ScopeSpec};

static NO_SCOPES: BTreeMap<String, ScopeDefinition> = BTreeMap::new();

#[derive(Debug, Clone)]
struct EntityEntry {
    entity_type: EntityType,
    scopes: BTreeMap<String, ScopeDefinition>,
}

/// Registry of entity types and their scopes.
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    entities: BTreeMap<EntityTypeId, EntityEntry>,
}

impl ScopeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type.
    ///
    /// # Errors
    ///
    /// Fails if a type with the same id is already registered.
    pub fn register_entity(&mut self, entity_type: EntityType) -> Result<(), ConfigurationError> {
        let id = entity_type.id().clone();
        if self.entities.contains_key(&id) {
            return Err(ConfigurationError::DuplicateEntityType {
                entity_type: id.to_string(),
            });
        }
        self.entities.insert(
            id,
            EntityEntry {
                entity_type,
                scopes: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Validates `spec` against the entity type and stores it.
    ///
    /// # Errors
    ///
    /// Fails on an unknown entity type, a duplicate scope name, unknown trigger,
    /// payload, temporal, condition or action fields, unknown relationships or
    /// fires-scope targets, and on rules the entity type lacks the capability for.
    pub fn register(
        &mut self,
        entity_type: &EntityTypeId,
        spec: ScopeSpec,
    ) -> Result<&ScopeDefinition, ConfigurationError> {
        let entry = self
            .entities
            .get_mut(entity_type)
            .ok_or_else(|| ConfigurationError::UnknownEntityType {
                entity_type: entity_type.to_string(),
            })?;

        let definition = validate(&entry.entity_type, &entry.scopes, spec)?;
        debug!(
            entity_type = %entity_type,
            scope = %definition.name,
            "registered scope"
        );

        let name = definition.name.clone();
        let stored: &ScopeDefinition = entry.scopes.entry(name).or_insert(definition);
        Ok(stored)
    }

    /// Scopes registered for an entity type; empty for unknown types.
    #[must_use]
    pub fn get(&self, entity_type: &EntityTypeId) -> &BTreeMap<String, ScopeDefinition> {
        self.entities
            .get(entity_type)
            .map_or(&NO_SCOPES, |entry| &entry.scopes)
    }

    /// One scope by its namespaced name.
    #[must_use]
    pub fn scope(&self, entity_type: &EntityTypeId, name: &str) -> Option<&ScopeDefinition> {
        self.get(entity_type).get(name)
    }

    /// The descriptor of a registered entity type.
    #[must_use]
    pub fn entity(&self, entity_type: &EntityTypeId) -> Option<&EntityType> {
        self.entities.get(entity_type).map(|entry| &entry.entity_type)
    }

    /// Iterates over registered entity types.
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.values().map(|entry| &entry.entity_type)
    }

    /// Total number of registered scopes.
    #[must_use]
    pub fn scope_count(&self) -> usize {
        self.entities.values().map(|entry| entry.scopes.len()).sum()
    }
}

fn unknown_columns<'a>(
    entity_type: &EntityType,
    fields: impl IntoIterator<Item = &'a String>,
) -> Vec<String> {
    fields
        .into_iter()
        .filter(|f| !entity_type.has_column(f))
        .cloned()
        .collect()
}

fn require(
    entity_type: &EntityType,
    scope: &str,
    capability: Capability,
) -> Result<(), ConfigurationError> {
    if entity_type.supports(capability) {
        Ok(())
    } else {
        Err(ConfigurationError::CapabilityMissing {
            scope: scope.to_string(),
            entity_type: entity_type.id().to_string(),
            capability,
        })
    }
}

fn require_column(
    entity_type: &EntityType,
    scope: &str,
    field: &str,
) -> Result<(), ConfigurationError> {
    if entity_type.has_column(field) {
        Ok(())
    } else {
        Err(ConfigurationError::UnknownConditionField {
            scope: scope.to_string(),
            field: field.to_string(),
        })
    }
}

fn validate(
    entity_type: &EntityType,
    existing: &BTreeMap<String, ScopeDefinition>,
    spec: ScopeSpec,
) -> Result<ScopeDefinition, ConfigurationError> {
    let name = entity_type.qualify(&spec.name);

    if existing.contains_key(&name) {
        return Err(ConfigurationError::DuplicateScope {
            scope: name,
            entity_type: entity_type.id().to_string(),
        });
    }

    if spec.trigger_fields.is_empty() {
        return Err(ConfigurationError::EmptyTriggerFields { scope: name });
    }

    let invalid = unknown_columns(entity_type, &spec.trigger_fields);
    if !invalid.is_empty() {
        return Err(ConfigurationError::UnknownTriggerFields {
            scope: name,
            fields: invalid,
        });
    }

    if let Some(fields) = &spec.payload_fields {
        let invalid: Vec<String> = unknown_columns(entity_type, fields)
            .into_iter()
            .filter(|f| !entity_type.has_relationship(f))
            .collect();
        if !invalid.is_empty() {
            return Err(ConfigurationError::UnknownPayloadFields {
                scope: name,
                fields: invalid,
            });
        }
    }

    if !spec.relationships.is_empty() {
        require(entity_type, &name, Capability::Relationships)?;
        for (relationship, rule) in &spec.relationships {
            if !entity_type.has_relationship(relationship) {
                return Err(ConfigurationError::UnknownRelationship {
                    scope: name,
                    relationship: relationship.clone(),
                });
            }
            if let Some(condition) = &rule.condition {
                require_column(entity_type, &name, &condition.field)?;
                if let Operator::Unsupported(token) = &condition.operator {
                    warn!(
                        scope = %name,
                        relationship = %relationship,
                        operator = %token,
                        "relationship condition uses an unknown operator and will never match"
                    );
                }
            }
        }
    }

    let mut temporal_rules = Vec::with_capacity(spec.temporal_fields.len());
    if !spec.temporal_fields.is_empty() {
        require(entity_type, &name, Capability::Temporal)?;
        for rule in &spec.temporal_fields {
            for field in std::iter::once(&rule.expires_at_field).chain(rule.status_field.as_ref()) {
                if !entity_type.has_column(field) {
                    return Err(ConfigurationError::UnknownTemporalField {
                        scope: name,
                        field: field.clone(),
                    });
                }
            }

            let fires_scope = rule
                .fires_scope
                .as_deref()
                .map_or_else(|| name.clone(), |target| entity_type.qualify(target));
            if fires_scope != name && !existing.contains_key(&fires_scope) {
                return Err(ConfigurationError::UnknownFiresScope {
                    scope: name,
                    fires_scope,
                });
            }

            let status = rule.status_field.clone().map(|field| {
                (field, rule.status_value.clone().unwrap_or_default())
            });
            temporal_rules.push(ResolvedTemporalRule {
                expires_at_field: rule.expires_at_field.clone(),
                status,
                fires_scope,
            });
        }
    }

    if !spec.actions.is_empty() {
        require(entity_type, &name, Capability::Actions)?;
        for action in &spec.actions {
            if let Some(condition) = &action.condition {
                require_column(entity_type, &name, condition.field())?;
            }
            for param in action.params.values() {
                if let ActionParam::Field(column) = param {
                    if !entity_type.has_column(column) {
                        return Err(ConfigurationError::UnknownActionField {
                            scope: name,
                            action_type: action.action_type.clone(),
                            field: column.clone(),
                        });
                    }
                }
            }
        }
    }

    let resolved_fields: BTreeSet<String> = spec
        .payload_fields
        .as_ref()
        .unwrap_or_else(|| entity_type.columns())
        .iter()
        .filter(|f| !entity_type.has_relationship(f))
        .cloned()
        .collect();

    Ok(ScopeDefinition {
        name,
        entity_type: entity_type.id().clone(),
        trigger_fields: spec.trigger_fields,
        payload_fields: spec.payload_fields,
        resolved_fields,
        stage: spec.stage,
        relationships: spec.relationships,
        temporal_rules,
        actions: spec.actions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::condition::{ActionCondition, Condition};
    use crate::scope::definition::{ActionRule, RelationshipRule, Stage, TemporalRule};
    use crate::value::Value;

    fn transaction() -> EntityType {
        EntityType::builder("Transaction", "transaction")
            .columns(["user_id", "amount", "type", "service_id", "recipient_id"])
            .relationships(["service", "user"])
            .capability(Capability::Relationships)
            .capability(Capability::Actions)
            .build()
    }

    fn registry() -> (ScopeRegistry, EntityTypeId) {
        let mut registry = ScopeRegistry::new();
        let ty = transaction();
        let id = ty.id().clone();
        registry.register_entity(ty).unwrap();
        (registry, id)
    }

    #[test]
    fn test_register_namespaces_and_resolves_fields() {
        let (mut registry, id) = registry();
        let def = registry
            .register(
                &id,
                ScopeSpec::new("amount", ["amount"])
                    .payload_fields(["id", "user_id", "amount", "type"])
                    .stage(Stage::Both),
            )
            .unwrap();
        assert_eq!(def.name(), "transaction.amount");
        assert_eq!(def.resolved_fields().len(), 4);

        let all = registry.register(&id, ScopeSpec::new("full", ["type"])).unwrap();
        assert!(all.resolved_fields().contains("recipient_id"));
        assert!(!all.resolved_fields().contains("service"));
    }

    #[test]
    fn test_duplicate_scope_rejected_and_first_kept() {
        let (mut registry, id) = registry();
        registry
            .register(&id, ScopeSpec::new("amount", ["amount"]).stage(Stage::Both))
            .unwrap();
        let err = registry
            .register(&id, ScopeSpec::new("amount", ["type"]))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateScope { .. }));
        let kept = registry.scope(&id, "transaction.amount").unwrap();
        assert_eq!(kept.stage(), Stage::Both);
        assert!(kept.is_trigger("amount"));
    }

    #[test]
    fn test_unknown_trigger_and_payload_fields() {
        let (mut registry, id) = registry();
        let err = registry
            .register(&id, ScopeSpec::new("bad", ["amont"]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownTriggerFields {
                scope: "transaction.bad".into(),
                fields: vec!["amont".into()],
            }
        );

        let err = registry
            .register(&id, ScopeSpec::new("bad", ["amount"]).payload_fields(["id", "kind"]))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownPayloadFields { .. }));
    }

    #[test]
    fn test_relationship_names_exempt_from_payload_validation() {
        let (mut registry, id) = registry();
        let def = registry
            .register(
                &id,
                ScopeSpec::new("created", ["amount"])
                    .payload_fields(["id", "amount", "service"])
                    .relationship("service", RelationshipRule::all_fields()),
            )
            .unwrap();
        assert!(!def.resolved_fields().contains("service"));
    }

    #[test]
    fn test_empty_triggers_rejected() {
        let (mut registry, id) = registry();
        let err = registry
            .register(&id, ScopeSpec::new("nothing", Vec::<String>::new()))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyTriggerFields { .. }));
    }

    #[test]
    fn test_capability_gating() {
        let (mut registry, id) = registry();
        let err = registry
            .register(
                &id,
                ScopeSpec::new("expiry", ["amount"]).temporal(TemporalRule::new("amount")),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::CapabilityMissing {
                capability: Capability::Temporal,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_relationship_rejected() {
        let (mut registry, id) = registry();
        let err = registry
            .register(
                &id,
                ScopeSpec::new("created", ["amount"])
                    .relationship("recipient", RelationshipRule::all_fields()),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownRelationship { .. }));
    }

    #[test]
    fn test_action_fields_validated() {
        let (mut registry, id) = registry();
        let err = registry
            .register(
                &id,
                ScopeSpec::new("flow", ["amount"])
                    .action(ActionRule::new("update_balance").field("user_id", "payer_id")),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownActionField { .. }));

        let err = registry
            .register(
                &id,
                ScopeSpec::new("flow", ["amount"]).action(
                    ActionRule::new("update_balance")
                        .when(ActionCondition::Predicate(Condition::new("kind", "==", "x"))),
                ),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownConditionField { .. }));
    }

    #[test]
    fn test_get_unknown_type_is_empty() {
        let registry = ScopeRegistry::new();
        assert!(registry.get(&EntityTypeId::new("Ghost")).is_empty());
        let mut registry = registry;
        let err = registry
            .register(&EntityTypeId::new("Ghost"), ScopeSpec::new("x", ["id"]))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownEntityType { .. }));
    }

    #[test]
    fn test_fires_scope_must_exist() {
        let mut registry = ScopeRegistry::new();
        let ty = EntityType::builder("PurchasedItem", "purchased_item")
            .columns(["status", "expires_at"])
            .capability(Capability::Temporal)
            .build();
        let id = ty.id().clone();
        registry.register_entity(ty).unwrap();

        let err = registry
            .register(
                &id,
                ScopeSpec::new("expiration", ["expires_at"])
                    .temporal(TemporalRule::new("expires_at").fires("status")),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownFiresScope { .. }));

        registry
            .register(&id, ScopeSpec::new("status", ["status"]))
            .unwrap();
        let def = registry
            .register(
                &id,
                ScopeSpec::new("expiration", ["expires_at"]).temporal(
                    TemporalRule::new("expires_at")
                        .status("status", "expired")
                        .fires("status"),
                ),
            )
            .unwrap();
        let rule = &def.temporal_rules()[0];
        assert_eq!(rule.fires_scope, "purchased_item.status");
        assert_eq!(
            rule.status,
            Some(("status".to_string(), Value::String("expired".into())))
        );
    }

    #[test]
    fn test_duplicate_entity_type() {
        let (mut registry, _) = registry();
        let err = registry.register_entity(transaction()).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateEntityType { .. }));
    }
}

//! The platform catalog registers cleanly and wires the declared features.

use webhook_scopes::catalog::community::{Application, Punishment, PunishmentConfig, User, Webhook};
use webhook_scopes::catalog::payments::{
    Balance, Donation, PurchasedItem, Service, Transaction, ITEM_EXPIRED,
};
use webhook_scopes::catalog::{register_platform, ScopedModel};
use webhook_scopes::{
    Capability, ConfigurationError, EntityTypeId, ScopeRegistry, Stage, Value,
};

fn platform() -> ScopeRegistry {
    let mut registry = ScopeRegistry::new();
    register_platform(&mut registry).unwrap();
    registry
}

fn scope_names(registry: &ScopeRegistry, entity_type: &str) -> Vec<String> {
    registry
        .get(&EntityTypeId::new(entity_type))
        .keys()
        .cloned()
        .collect()
}

#[test]
fn every_model_is_registered() {
    let registry = platform();
    let mut types: Vec<_> = registry
        .entity_types()
        .map(|ty| ty.id().as_str().to_string())
        .collect();
    types.sort();
    assert_eq!(
        types,
        [
            "Application",
            "Balance",
            "Donation",
            "PurchasedItem",
            "Punishment",
            "PunishmentConfig",
            "Service",
            "Transaction",
            "User",
            "Webhook",
        ]
    );
    assert_eq!(registry.scope_count(), 40);
}

#[test]
fn scope_names_are_namespaced() {
    let registry = platform();
    assert_eq!(
        scope_names(&registry, Transaction::ENTITY_TYPE),
        [
            "transaction.amount",
            "transaction.created",
            "transaction.purchase_flow",
            "transaction.type",
        ]
    );
    assert_eq!(
        scope_names(&registry, Webhook::ENTITY_TYPE),
        [
            "webhook.authorization",
            "webhook.endpoint",
            "webhook.scopes",
            "webhook.status",
        ]
    );
    assert_eq!(
        scope_names(&registry, PunishmentConfig::ENTITY_TYPE),
        [
            "punishment_config.created",
            "punishment_config.status_changed",
            "punishment_config.updated",
        ]
    );
}

#[test]
fn registering_the_platform_twice_fails() {
    let mut registry = platform();
    let err = register_platform(&mut registry).unwrap_err();
    assert!(matches!(err, ConfigurationError::DuplicateEntityType { .. }));
}

#[test]
fn capabilities_match_declared_features() {
    let registry = platform();
    let transaction = registry
        .entity(&EntityTypeId::new(Transaction::ENTITY_TYPE))
        .unwrap();
    assert!(transaction.supports(Capability::Relationships));
    assert!(transaction.supports(Capability::Actions));
    assert!(!transaction.supports(Capability::Temporal));

    let item = registry.entity(&EntityTypeId::new(PurchasedItem::ENTITY_TYPE)).unwrap();
    assert!(item.supports(Capability::Temporal));
    assert!(!item.supports(Capability::Actions));

    for plain in [
        Service::ENTITY_TYPE,
        Balance::ENTITY_TYPE,
        Donation::ENTITY_TYPE,
        User::ENTITY_TYPE,
        Webhook::ENTITY_TYPE,
        Punishment::ENTITY_TYPE,
    ] {
        let ty = registry.entity(&EntityTypeId::new(plain)).unwrap();
        for capability in [Capability::Relationships, Capability::Temporal, Capability::Actions] {
            assert!(!ty.supports(capability), "{plain} should not support {capability}");
        }
    }
    assert!(registry
        .entity(&EntityTypeId::new(Application::ENTITY_TYPE))
        .unwrap()
        .supports(Capability::Relationships));
}

#[test]
fn stages_follow_the_scope_tables() {
    let registry = platform();
    let stage = |ty: &str, scope: &str| {
        registry
            .scope(&EntityTypeId::new(ty), scope)
            .map(|s| s.stage())
            .unwrap()
    };
    assert_eq!(stage("Transaction", "transaction.amount"), Stage::Both);
    assert_eq!(stage("Transaction", "transaction.created"), Stage::After);
    assert_eq!(stage("User", "user.superuser"), Stage::Both);
    assert_eq!(stage("Service", "service.content"), Stage::After);
    assert_eq!(stage("Donation", "donation.updated"), Stage::Both);
}

#[test]
fn full_scopes_project_every_column() {
    let registry = platform();
    let service = registry
        .scope(&EntityTypeId::new(Service::ENTITY_TYPE), "service.full")
        .unwrap();
    assert!(service.payload_fields().is_none());
    assert!(service.resolved_fields().contains("discounts"));
    assert!(service.resolved_fields().contains("id"));
    assert!(service.resolved_fields().contains("created_at"));
}

#[test]
fn purchased_item_expiry_rule() {
    let registry = platform();
    let expiration = registry
        .scope(
            &EntityTypeId::new(PurchasedItem::ENTITY_TYPE),
            "purchased_item.expiration",
        )
        .unwrap();
    let rules = expiration.temporal_rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].expires_at_field, "expires_at");
    assert_eq!(
        rules[0].status,
        Some(("status".to_string(), Value::from(ITEM_EXPIRED)))
    );
}

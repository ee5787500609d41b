use crate::entity::{Capability, EntityType};
use crate::scope::{
    ActionCondition, ActionRule, Condition, Operator, RelationshipRule, ScopeSpec, Stage,
    TemporalRule,
};
use crate::value::Value;

use super::{ScopedModel, TIMESTAMPS};

/// `Transaction.type` of a purchase.
pub const TRANSACTION_PURCHASE: &str = "purchase";
/// `PurchasedItem.status` of an item in use.
pub const ITEM_ACTIVE: &str = "active";
/// `PurchasedItem.status` once `expires_at` has passed.
pub const ITEM_EXPIRED: &str = "expired";

/// Fields of a service as embedded in other payloads.
const SERVICE_RESPONSE: [&str; 12] = [
    "id",
    "name",
    "display_name",
    "description",
    "price",
    "currency",
    "is_active",
    "category",
    "type",
    "duration_months",
    "created_at",
    "updated_at",
];

/// A purchasable service.
#[derive(Debug, Clone, Copy)]
pub struct Service;

impl ScopedModel for Service {
    const ENTITY_TYPE: &'static str = "Service";

    fn entity_type() -> EntityType {
        EntityType::builder(Self::ENTITY_TYPE, "service")
            .columns([
                "name",
                "display_name",
                "description",
                "points",
                "image",
                "price",
                "currency",
                "is_active",
                "category",
                "type",
                "duration_months",
                "is_upgradable",
                "upgrade_from",
                "upgrade_to",
                "service_metadata",
                "discounts",
            ])
            .columns(TIMESTAMPS)
            .build()
    }

    fn scopes() -> Vec<ScopeSpec> {
        vec![
            ScopeSpec::new(
                "full",
                [
                    "name",
                    "display_name",
                    "description",
                    "points",
                    "image",
                    "price",
                    "currency",
                    "is_active",
                    "category",
                    "type",
                    "duration_months",
                    "is_upgradable",
                    "upgrade_from",
                    "upgrade_to",
                    "service_metadata",
                    "discounts",
                ],
            ),
            ScopeSpec::new("status", ["is_active"])
                .payload_fields(["id", "name", "display_name", "is_active"])
                .stage(Stage::Both),
            ScopeSpec::new("price", ["price"])
                .payload_fields(["id", "name", "display_name", "price", "currency"])
                .stage(Stage::Both),
            ScopeSpec::new("content", ["description", "points", "image"])
                .payload_fields(["id", "name", "display_name", "description", "points", "image"]),
            ScopeSpec::new("discounts", ["discounts"])
                .payload_fields(["id", "name", "display_name", "discounts"]),
            ScopeSpec::new("upgrade", ["is_upgradable", "upgrade_from", "upgrade_to"]).payload_fields(
                ["id", "name", "display_name", "is_upgradable", "upgrade_from", "upgrade_to"],
            ),
            ScopeSpec::new("metadata", ["service_metadata"])
                .payload_fields(["id", "name", "display_name", "service_metadata"]),
            ScopeSpec::new("subscription", ["type", "duration_months"])
                .payload_fields(["id", "name", "display_name", "type", "duration_months"]),
        ]
    }
}

/// A money movement between users, optionally buying a service.
#[derive(Debug, Clone, Copy)]
pub struct Transaction;

impl ScopedModel for Transaction {
    const ENTITY_TYPE: &'static str = "Transaction";

    fn entity_type() -> EntityType {
        EntityType::builder(Self::ENTITY_TYPE, "transaction")
            .columns([
                "user_id",
                "amount",
                "type",
                "description",
                "recipient_id",
                "service_id",
                "transaction_metadata",
            ])
            .columns(TIMESTAMPS)
            .relationships(["service", "user", "recipient"])
            .capability(Capability::Relationships)
            .capability(Capability::Actions)
            .build()
    }

    fn scopes() -> Vec<ScopeSpec> {
        let base = ["id", "user_id", "amount", "type", "description"];
        vec![
            ScopeSpec::new(
                "created",
                ["user_id", "amount", "type", "description", "recipient_id", "service_id"],
            )
            .payload_fields([
                "id",
                "user_id",
                "recipient_id",
                "amount",
                "type",
                "description",
                "service_id",
                "transaction_metadata",
            ])
            .relationship(
                "service",
                RelationshipRule::all_fields()
                    .fields(SERVICE_RESPONSE)
                    .when(Condition::new("service_id", Operator::IsNot, Value::Null)),
            ),
            ScopeSpec::new("type", ["type"])
                .payload_fields(base)
                .stage(Stage::Both),
            ScopeSpec::new("amount", ["amount"])
                .payload_fields(base)
                .stage(Stage::Both),
            ScopeSpec::new("purchase_flow", ["type", "service_id", "amount"])
                .payload_fields([
                    "id",
                    "user_id",
                    "recipient_id",
                    "amount",
                    "type",
                    "service_id",
                    "transaction_metadata",
                ])
                .relationship(
                    "service",
                    RelationshipRule::all_fields()
                        .fields(SERVICE_RESPONSE)
                        .when(Condition::new("type", Operator::Eq, TRANSACTION_PURCHASE)),
                )
                .action(
                    ActionRule::new("update_balance")
                        .field("user_id", "recipient_id")
                        .field("amount", "amount"),
                )
                .action(
                    ActionRule::new("create_or_update_purchased_item")
                        .when(ActionCondition::Predicate(Condition::new(
                            "type",
                            Operator::Eq,
                            TRANSACTION_PURCHASE,
                        )))
                        .field("user_id", "recipient_id")
                        .field("service_id", "service_id")
                        .field("transaction_id", "id")
                        .constant("status", ITEM_ACTIVE)
                        .constant("quantity", 1),
                ),
        ]
    }
}

/// A service a user owns, possibly time-limited.
#[derive(Debug, Clone, Copy)]
pub struct PurchasedItem;

impl ScopedModel for PurchasedItem {
    const ENTITY_TYPE: &'static str = "PurchasedItem";

    fn entity_type() -> EntityType {
        EntityType::builder(Self::ENTITY_TYPE, "purchased_item")
            .columns([
                "user_id",
                "service_id",
                "transaction_id",
                "status",
                "quantity",
                "expires_at",
                "purchase_metadata",
            ])
            .columns(TIMESTAMPS)
            .relationships(["user", "service", "transaction"])
            .capability(Capability::Relationships)
            .capability(Capability::Temporal)
            .build()
    }

    fn scopes() -> Vec<ScopeSpec> {
        vec![
            ScopeSpec::new(
                "full",
                [
                    "user_id",
                    "service_id",
                    "transaction_id",
                    "status",
                    "quantity",
                    "expires_at",
                    "purchase_metadata",
                ],
            ),
            ScopeSpec::new("status", ["status"])
                .payload_fields(["id", "user_id", "service_id", "status", "expires_at"])
                .stage(Stage::Both),
            ScopeSpec::new("details", ["quantity"])
                .payload_fields(["id", "user_id", "service_id", "quantity", "status"])
                .stage(Stage::Both),
            ScopeSpec::new("expiration", ["expires_at"])
                .payload_fields(["id", "user_id", "service_id", "status", "expires_at"])
                .stage(Stage::Both)
                .temporal(
                    TemporalRule::new("expires_at")
                        .status("status", ITEM_EXPIRED)
                        .fires("expiration"),
                ),
            ScopeSpec::new("metadata", ["purchase_metadata"])
                .payload_fields(["id", "user_id", "service_id", "purchase_metadata"]),
        ]
    }
}

/// A user's wallet.
#[derive(Debug, Clone, Copy)]
pub struct Balance;

impl ScopedModel for Balance {
    const ENTITY_TYPE: &'static str = "Balance";

    fn entity_type() -> EntityType {
        EntityType::builder(Self::ENTITY_TYPE, "balance")
            .columns(["user_id", "identifier", "amount"])
            .columns(TIMESTAMPS)
            .relationships(["user"])
            .build()
    }

    fn scopes() -> Vec<ScopeSpec> {
        vec![
            ScopeSpec::new("amount", ["amount"])
                .payload_fields(["id", "user_id", "amount", "identifier"])
                .stage(Stage::Both),
            ScopeSpec::new("full", ["user_id", "amount", "identifier"]),
        ]
    }
}

/// An external donation credited to a balance.
#[derive(Debug, Clone, Copy)]
pub struct Donation;

impl ScopedModel for Donation {
    const ENTITY_TYPE: &'static str = "Donation";

    fn entity_type() -> EntityType {
        EntityType::builder(Self::ENTITY_TYPE, "donation")
            .columns([
                "user_id",
                "balance_id",
                "amount",
                "currency",
                "donor_name",
                "donor_email",
                "message",
                "source",
                "donatello_transaction_id",
            ])
            .columns(TIMESTAMPS)
            .build()
    }

    fn scopes() -> Vec<ScopeSpec> {
        vec![
            ScopeSpec::new(
                "created",
                [
                    "user_id",
                    "amount",
                    "currency",
                    "donor_name",
                    "donor_email",
                    "message",
                    "source",
                    "donatello_transaction_id",
                ],
            ),
            ScopeSpec::new(
                "updated",
                ["amount", "currency", "donor_name", "donor_email", "message"],
            )
            .payload_fields([
                "id",
                "user_id",
                "amount",
                "currency",
                "donor_name",
                "donor_email",
                "message",
                "source",
                "donatello_transaction_id",
            ])
            .stage(Stage::Both),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ActionParam, ScopeRegistry};

    #[test]
    fn transaction_scopes_register() {
        let mut registry = ScopeRegistry::new();
        Service::register(&mut registry).unwrap();
        Transaction::register(&mut registry).unwrap();
        let id = Transaction::entity_type().id().clone();

        let scopes = registry.get(&id);
        assert_eq!(scopes.len(), 4);
        let flow = &scopes["transaction.purchase_flow"];
        assert_eq!(flow.actions().len(), 2);
        assert_eq!(
            flow.actions()[1].params["transaction_id"],
            ActionParam::Field("id".into())
        );
        assert!(flow.relationships()["service"].condition.is_some());
    }

    #[test]
    fn purchased_item_expiration_targets_itself() {
        let mut registry = ScopeRegistry::new();
        PurchasedItem::register(&mut registry).unwrap();
        let def = registry
            .scope(PurchasedItem::entity_type().id(), "purchased_item.expiration")
            .unwrap();
        let rule = &def.temporal_rules()[0];
        assert_eq!(rule.fires_scope, "purchased_item.expiration");
        assert_eq!(
            rule.status,
            Some(("status".to_string(), Value::from(ITEM_EXPIRED)))
        );
    }
}

use crate::entity::{Capability, EntityType};
use crate::scope::{ScopeSpec, Stage};

use super::{ScopedModel, TIMESTAMPS};

/// `Punishment.status` values.
pub const PUNISHMENT_STATUSES: [&str; 3] = ["active", "expired", "revoked"];

/// A platform account.
#[derive(Debug, Clone, Copy)]
pub struct User;

impl ScopedModel for User {
    const ENTITY_TYPE: &'static str = "User";

    fn entity_type() -> EntityType {
        EntityType::builder(Self::ENTITY_TYPE, "user")
            .columns([
                "discord_id",
                "minecraft_nickname",
                "is_superuser",
                "biography",
                "access",
            ])
            .columns(TIMESTAMPS)
            .relationships([
                "roles",
                "token",
                "punishments",
                "balance",
                "application",
                "transactions",
                "received_transactions",
                "webhooks",
            ])
            .build()
    }

    fn scopes() -> Vec<ScopeSpec> {
        let identity = ["id", "discord_id", "minecraft_nickname"];
        vec![
            ScopeSpec::new("minecraft_nickname", ["minecraft_nickname"])
                .payload_fields(identity)
                .stage(Stage::Both),
            ScopeSpec::new("discord_id", ["discord_id"])
                .payload_fields(identity)
                .stage(Stage::Both),
            ScopeSpec::new("superuser", ["is_superuser"])
                .payload_fields([
                    "id",
                    "discord_id",
                    "minecraft_nickname",
                    "is_superuser",
                    "updated_at",
                ])
                .stage(Stage::Both),
            ScopeSpec::new("access", ["access"])
                .payload_fields(["id", "discord_id", "minecraft_nickname", "access"])
                .stage(Stage::Both),
            ScopeSpec::new(
                "full",
                ["discord_id", "minecraft_nickname", "is_superuser", "access"],
            ),
        ]
    }
}

/// A membership application.
#[derive(Debug, Clone, Copy)]
pub struct Application;

const APPLICATION_FORM: [&str; 9] = [
    "user_id",
    "birth_date",
    "launcher",
    "server_source",
    "private_server_experience",
    "useful_skills",
    "conflict_reaction",
    "quiz_answer",
    "editable_fields",
];

impl ScopedModel for Application {
    const ENTITY_TYPE: &'static str = "Application";

    fn entity_type() -> EntityType {
        EntityType::builder(Self::ENTITY_TYPE, "application")
            .columns(APPLICATION_FORM)
            .columns(["status"])
            .columns(TIMESTAMPS)
            .relationships(["user"])
            .capability(Capability::Relationships)
            .build()
    }

    fn scopes() -> Vec<ScopeSpec> {
        vec![
            ScopeSpec::new("status", ["status"])
                .payload_fields(["id", "user_id", "status"])
                .stage(Stage::Both),
            ScopeSpec::new("editable_fields", ["editable_fields"])
                .payload_fields(["id", "user_id", "editable_fields"]),
            ScopeSpec::new("form", APPLICATION_FORM).payload_fields([
                "user_id",
                "status",
                "birth_date",
                "launcher",
                "server_source",
                "private_server_experience",
                "useful_skills",
                "conflict_reaction",
                "quiz_answer",
            ]),
            ScopeSpec::new(
                "full",
                APPLICATION_FORM.into_iter().chain(std::iter::once("status")),
            ),
        ]
    }
}

/// An outbound webhook subscription.
#[derive(Debug, Clone, Copy)]
pub struct Webhook;

impl ScopedModel for Webhook {
    const ENTITY_TYPE: &'static str = "Webhook";

    fn entity_type() -> EntityType {
        EntityType::builder(Self::ENTITY_TYPE, "webhook")
            .columns(["endpoint", "status", "scopes", "authorization"])
            .columns(TIMESTAMPS)
            .build()
    }

    fn scopes() -> Vec<ScopeSpec> {
        vec![
            ScopeSpec::new("status", ["status"])
                .payload_fields(["id", "endpoint", "status"])
                .stage(Stage::Both),
            ScopeSpec::new("endpoint", ["endpoint"])
                .payload_fields(["id", "endpoint", "status"])
                .stage(Stage::Both),
            ScopeSpec::new("scopes", ["scopes"])
                .payload_fields(["id", "endpoint", "status", "scopes"])
                .stage(Stage::Both),
            ScopeSpec::new("authorization", ["authorization"])
                .payload_fields(["id", "endpoint", "status", "scopes", "authorization"])
                .stage(Stage::Both),
        ]
    }
}

/// Warn thresholds and decay settings for punishments.
#[derive(Debug, Clone, Copy)]
pub struct PunishmentConfig;

impl ScopedModel for PunishmentConfig {
    const ENTITY_TYPE: &'static str = "PunishmentConfig";

    fn entity_type() -> EntityType {
        EntityType::builder(Self::ENTITY_TYPE, "punishment_config")
            .columns([
                "name",
                "description",
                "is_active",
                "warn_threshold",
                "warn_decay_days",
                "config_data",
            ])
            .columns(TIMESTAMPS)
            .relationships(["punishments"])
            .build()
    }

    fn scopes() -> Vec<ScopeSpec> {
        let triggers = [
            "name",
            "is_active",
            "warn_threshold",
            "warn_decay_days",
            "config_data",
        ];
        let payload = ["id", "name", "is_active", "warn_threshold", "warn_decay_days"];
        vec![
            ScopeSpec::new("created", triggers).payload_fields(payload),
            ScopeSpec::new("updated", triggers)
                .payload_fields(payload)
                .stage(Stage::Both),
            ScopeSpec::new("status_changed", ["is_active"])
                .payload_fields(["id", "name", "is_active"])
                .stage(Stage::Both),
        ]
    }
}

/// A warning, mute or ban issued to a user.
#[derive(Debug, Clone, Copy)]
pub struct Punishment;

impl ScopedModel for Punishment {
    const ENTITY_TYPE: &'static str = "Punishment";

    fn entity_type() -> EntityType {
        EntityType::builder(Self::ENTITY_TYPE, "punishment")
            .columns([
                "user_id",
                "admin_id",
                "type",
                "status",
                "reason",
                "expires_at",
                "config_id",
                "metadata",
            ])
            .columns(TIMESTAMPS)
            .relationships(["user", "admin", "config"])
            .build()
    }

    fn scopes() -> Vec<ScopeSpec> {
        vec![
            ScopeSpec::new(
                "created",
                [
                    "user_id",
                    "admin_id",
                    "type",
                    "status",
                    "reason",
                    "expires_at",
                    "config_id",
                ],
            )
            .payload_fields([
                "id",
                "user_id",
                "admin_id",
                "type",
                "status",
                "reason",
                "expires_at",
            ]),
            ScopeSpec::new("status_changed", ["status"])
                .payload_fields(["id", "user_id", "admin_id", "type", "status", "reason"])
                .stage(Stage::Both),
            ScopeSpec::new("warn_added", ["type", "status"]).payload_fields([
                "id",
                "user_id",
                "admin_id",
                "type",
                "status",
                "reason",
                "config_id",
            ]),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeRegistry;

    #[test]
    fn application_form_excludes_status_trigger() {
        let mut registry = ScopeRegistry::new();
        Application::register(&mut registry).unwrap();
        let form = registry
            .scope(Application::entity_type().id(), "application.form")
            .unwrap();
        assert!(!form.is_trigger("status"));
        assert!(form.resolved_fields().contains("status"));

        let full = registry
            .scope(Application::entity_type().id(), "application.full")
            .unwrap();
        assert!(full.is_trigger("status"));
        assert!(full.payload_fields().is_none());
    }

    #[test]
    fn user_payload_never_lists_relationships() {
        let mut registry = ScopeRegistry::new();
        User::register(&mut registry).unwrap();
        let full = registry.scope(User::entity_type().id(), "user.full").unwrap();
        assert!(full.resolved_fields().contains("biography"));
        assert!(!full.resolved_fields().contains("webhooks"));
    }
}

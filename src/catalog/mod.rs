//! Scope tables of the community platform.
//!
//! Each model declares its entity type (columns, relationships, capabilities)
//! and its scopes through the same registration API any other caller uses.
//! Action handlers referenced here (`update_balance`,
//! `create_or_update_purchased_item`) touch persistence and are registered
//! by the host application.

/// Community models: users, applications, webhooks, punishments.
pub mod community;
/// Payment models: services, transactions, purchases, balances, donations.
pub mod payments;

use crate::entity::EntityType;
use crate::error::ConfigurationError;
use crate::scope::{ScopeRegistry, ScopeSpec};

/// A model that owns an entity type and a scope table.
pub trait ScopedModel {
    /// Stable entity type id.
    const ENTITY_TYPE: &'static str;

    /// The entity type descriptor.
    fn entity_type() -> EntityType;

    /// Scopes in registration order. A scope targeted by a temporal rule
    /// precedes the scope declaring the rule.
    fn scopes() -> Vec<ScopeSpec>;

    /// Registers the entity type and all of its scopes.
    ///
    /// # Errors
    ///
    /// Propagates the first registration error.
    fn register(registry: &mut ScopeRegistry) -> Result<(), ConfigurationError> {
        let entity_type = Self::entity_type();
        let id = entity_type.id().clone();
        registry.register_entity(entity_type)?;
        for spec in Self::scopes() {
            registry.register(&id, spec)?;
        }
        Ok(())
    }
}

/// Registers every platform model.
///
/// # Errors
///
/// Fails if any model is already registered or declares an invalid scope.
pub fn register_platform(registry: &mut ScopeRegistry) -> Result<(), ConfigurationError> {
    payments::Service::register(registry)?;
    payments::Transaction::register(registry)?;
    payments::PurchasedItem::register(registry)?;
    payments::Balance::register(registry)?;
    payments::Donation::register(registry)?;
    community::User::register(registry)?;
    community::Application::register(registry)?;
    community::Webhook::register(registry)?;
    community::PunishmentConfig::register(registry)?;
    community::Punishment::register(registry)?;
    Ok(())
}

/// Timestamp columns shared by most tables.
pub(crate) const TIMESTAMPS: [&str; 2] = ["created_at", "updated_at"];

//! The scope engine facade.
//!
//! [`ScopeEngine`] wires the registry, the change detector, the payload
//! builder, the action executor and the event sink together. It is built once
//! during process wiring and is cheap to clone; every table it holds is
//! read-only afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::actions::{ActionExecutor, ActionHandler, ActionOutcome, ActionRegistry};
use crate::config::EngineConfig;
use crate::detect::{
    ChangeDetector, ChangeSet, DetectionReport, ExpirationCallback, TemporalCallbacks,
};
use crate::emit::{EventSink, ScopeEvent, ScopeEventStream};
use crate::entity::{EntityState, EntityType, EntityTypeId};
use crate::error::{ConfigurationError, ScopeError, ScopeResult};
use crate::payload::{BuiltPayload, PayloadBuilder, RelationshipOutcome};
use crate::scope::{ScopeDefinition, ScopeRegistry};
use crate::store::{NoRelationships, RelationshipLoader};

/// Everything [`ScopeEngine::process_commit`] did for one entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommitReport {
    /// Triggered scopes and callback outcomes.
    pub detection: DetectionReport,
    /// One event per triggered scope, in scope-name order.
    pub events: Vec<ScopeEvent>,
    /// Relationship outcomes per scope.
    pub relationships: BTreeMap<String, Vec<RelationshipOutcome>>,
    /// Action outcomes across all triggered scopes.
    pub actions: Vec<ActionOutcome>,
    /// Events accepted by the sink. Zero when no sink is configured.
    pub published: usize,
}

impl CommitReport {
    /// The event of one scope, if it triggered.
    #[must_use]
    pub fn event(&self, scope: &str) -> Option<&ScopeEvent> {
        self.events.iter().find(|e| e.scope == scope)
    }
}

/// Builder for [`ScopeEngine`].
#[derive(Default)]
pub struct ScopeEngineBuilder {
    registry: Option<Arc<ScopeRegistry>>,
    loader: Option<Arc<dyn RelationshipLoader>>,
    actions: ActionRegistry,
    callbacks: TemporalCallbacks,
    config: EngineConfig,
    sink: Option<EventSink>,
}

impl std::fmt::Debug for ScopeEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeEngineBuilder")
            .field("actions", &self.actions)
            .field("callbacks", &self.callbacks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScopeEngineBuilder {
    /// Scope table the engine detects against.
    #[must_use]
    pub fn registry(mut self, registry: ScopeRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Shares an existing registry.
    #[must_use]
    pub fn shared_registry(mut self, registry: Arc<ScopeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Loader for relationship data. Defaults to a loader that has none.
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn RelationshipLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Handlers for declared actions.
    #[must_use]
    pub fn actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    /// Expiration callbacks per entity type.
    #[must_use]
    pub fn callbacks(mut self, callbacks: TemporalCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Timeouts and sweep settings.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Where built events are published.
    #[must_use]
    pub fn sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Registers an action handler.
    ///
    /// # Errors
    ///
    /// Fails if a handler for `action_type` is already registered.
    pub fn register_action_handler(
        mut self,
        action_type: impl Into<String>,
        handler: impl ActionHandler,
    ) -> Result<Self, ConfigurationError> {
        self.actions.register_action_handler(action_type, handler)?;
        Ok(self)
    }

    /// Registers the expiration callback of an entity type.
    ///
    /// # Errors
    ///
    /// Fails if the entity type already has a callback.
    pub fn register_temporal_expiration_callback(
        mut self,
        entity_type: impl Into<EntityTypeId>,
        callback: impl ExpirationCallback + 'static,
    ) -> Result<Self, ConfigurationError> {
        self.callbacks.register(entity_type, callback)?;
        Ok(self)
    }

    /// Finishes the engine.
    ///
    /// Action types referenced by scopes but lacking a handler are logged;
    /// they report [`ActionStatus::NoHandler`](crate::ActionStatus::NoHandler)
    /// at dispatch time.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid.
    pub fn build(self) -> Result<ScopeEngine, ConfigurationError> {
        self.config.validate()?;
        let registry = self.registry.unwrap_or_default();

        for entity_type in registry.entity_types() {
            for scope in registry.get(entity_type.id()).values() {
                for rule in scope.actions() {
                    if !self.actions.contains(&rule.action_type) {
                        warn!(
                            entity_type = %entity_type.id(),
                            scope = %scope.name(),
                            action_type = %rule.action_type,
                            "scope declares an action without a registered handler"
                        );
                    }
                }
            }
        }

        Ok(ScopeEngine {
            registry,
            loader: self.loader.unwrap_or_else(|| Arc::new(NoRelationships)),
            actions: Arc::new(self.actions),
            callbacks: Arc::new(self.callbacks),
            config: self.config,
            sink: self.sink,
        })
    }

    /// Finishes the engine with a fresh event queue sized by the config.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid.
    pub fn build_with_events(mut self) -> Result<(ScopeEngine, ScopeEventStream), ConfigurationError> {
        let (sink, stream) = EventSink::bounded(self.config.event_queue_capacity);
        self.sink = Some(sink);
        Ok((self.build()?, stream))
    }
}

/// Change detection, payload construction and action dispatch for committed
/// entities.
#[derive(Clone)]
pub struct ScopeEngine {
    registry: Arc<ScopeRegistry>,
    loader: Arc<dyn RelationshipLoader>,
    actions: Arc<ActionRegistry>,
    callbacks: Arc<TemporalCallbacks>,
    config: EngineConfig,
    sink: Option<EventSink>,
}

impl std::fmt::Debug for ScopeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeEngine")
            .field("scopes", &self.registry.scope_count())
            .field("actions", &self.actions)
            .field("callbacks", &self.callbacks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScopeEngine {
    /// A builder with default config and no handlers.
    #[must_use]
    pub fn builder() -> ScopeEngineBuilder {
        ScopeEngineBuilder::default()
    }

    /// The scope table.
    #[must_use]
    pub fn registry(&self) -> &ScopeRegistry {
        &self.registry
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The event sink, if one is configured.
    #[must_use]
    pub const fn sink(&self) -> Option<&EventSink> {
        self.sink.as_ref()
    }

    fn detector(&self) -> ChangeDetector<'_> {
        ChangeDetector::new(&self.registry, &self.callbacks)
            .with_passive_sweep(self.config.passive_expiry_sweep)
    }

    fn entity_type(&self, entity: &EntityState) -> ScopeResult<&EntityType> {
        self.registry.entity(entity.entity_type()).ok_or_else(|| {
            ConfigurationError::UnknownEntityType {
                entity_type: entity.entity_type().to_string(),
            }
            .into()
        })
    }

    /// Looks up a scope by namespaced or local name.
    fn scope(&self, entity: &EntityState, name: &str) -> ScopeResult<(&EntityType, &ScopeDefinition)> {
        let entity_type = self.entity_type(entity)?;
        let qualified = entity_type.qualify(name);
        self.registry
            .scope(entity_type.id(), &qualified)
            .map(|scope| (entity_type, scope))
            .ok_or(ScopeError::UnknownScope { scope: qualified })
    }

    /// Triggered scopes and their change sets.
    #[must_use]
    pub fn get_triggered_scopes(&self, entity: &EntityState) -> BTreeMap<String, ChangeSet> {
        self.detect(entity).into_change_sets()
    }

    /// Full detection pass at the current time.
    #[must_use]
    pub fn detect(&self, entity: &EntityState) -> DetectionReport {
        self.detect_at(entity, Utc::now())
    }

    /// Full detection pass at `now`.
    #[must_use]
    pub fn detect_at(&self, entity: &EntityState, now: DateTime<Utc>) -> DetectionReport {
        self.detector().detect(entity, now)
    }

    /// Builds the payload of one scope as JSON.
    ///
    /// # Errors
    ///
    /// Fails only for an unknown entity type or scope. Relationship problems
    /// are logged and the affected keys omitted.
    pub async fn build_payload(
        &self,
        entity: &EntityState,
        scope: &str,
        change_set: &ChangeSet,
    ) -> ScopeResult<serde_json::Value> {
        let built = self.build_payload_detailed(entity, scope, change_set).await?;
        Ok(built.payload.into_json())
    }

    /// Like [`build_payload`](Self::build_payload), also returning relationship outcomes.
    ///
    /// # Errors
    ///
    /// Fails only for an unknown entity type or scope.
    pub async fn build_payload_detailed(
        &self,
        entity: &EntityState,
        scope: &str,
        change_set: &ChangeSet,
    ) -> ScopeResult<BuiltPayload> {
        let (_, definition) = self.scope(entity, scope)?;
        Ok(self.payload_builder().build(definition, change_set, entity).await)
    }

    /// Runs the actions of one scope against the entity's current values.
    ///
    /// # Errors
    ///
    /// Fails only for an unknown entity type or scope. Handler failures are
    /// reported in the outcomes.
    pub async fn run_actions(
        &self,
        entity: &EntityState,
        scope: &str,
    ) -> ScopeResult<Vec<ActionOutcome>> {
        let (entity_type, definition) = self.scope(entity, scope)?;
        Ok(self.executor().run(entity_type, definition, entity).await)
    }

    /// Detects, builds and publishes one event per triggered scope, then runs
    /// the triggered scopes' actions. Never fails: unknown entity types yield
    /// an empty report.
    pub async fn process_commit(&self, entity: &EntityState) -> CommitReport {
        self.process_commit_at(entity, Utc::now()).await
    }

    /// [`process_commit`](Self::process_commit) at `now`.
    pub async fn process_commit_at(&self, entity: &EntityState, now: DateTime<Utc>) -> CommitReport {
        let Some(entity_type) = self.registry.entity(entity.entity_type()) else {
            debug!(entity_type = %entity.entity_type(), "commit for unregistered entity type");
            return CommitReport::default();
        };

        let detection = self.detector().detect(entity, now);
        let mut report = CommitReport::default();
        let builder = self.payload_builder();
        let scopes = self.registry.get(entity_type.id());

        for (name, triggered) in &detection.scopes {
            let Some(definition) = scopes.get(name) else {
                continue;
            };
            let built = builder.build(definition, &triggered.change_set, entity).await;
            let event = ScopeEvent::new(
                entity_type.id().clone(),
                detection.entity_id.clone(),
                name.clone(),
                definition.stage(),
                triggered.origin,
                built.payload.into_json(),
            );
            if let Some(sink) = &self.sink {
                if sink.publish(event.clone()) {
                    report.published += 1;
                }
            }
            report.events.push(event);
            report.relationships.insert(name.clone(), built.relationships);
        }

        let executor = self.executor();
        for name in detection.scopes.keys() {
            if let Some(definition) = scopes.get(name) {
                report
                    .actions
                    .extend(executor.run(entity_type, definition, entity).await);
            }
        }

        report.detection = detection;
        report
    }

    fn payload_builder(&self) -> PayloadBuilder<'_> {
        PayloadBuilder::new(self.loader.as_ref(), self.config.relationship_timeout())
    }

    fn executor(&self) -> ActionExecutor<'_> {
        ActionExecutor::new(&self.actions, self.config.action_timeout())
    }
}

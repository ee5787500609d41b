//! Scope definitions: what a scope watches, what it emits, and its optional
//! relationship, temporal and action rules.
//!
//! [`ScopeSpec`] is the registration input (buildable in code or deserialized
//! from JSON). The registry validates it against the entity type and stores an
//! immutable [`ScopeDefinition`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entity::EntityTypeId;
use crate::value::Value;

use super::condition::{ActionCondition, Condition};

/// Which snapshot(s) a payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The pre-mutation snapshot.
    Before,
    /// The post-mutation snapshot.
    #[default]
    After,
    /// Both snapshots, as `{"before": .., "after": ..}`.
    Both,
}

/// One side of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Snapshot {
    /// Pre-mutation values.
    Before,
    /// Post-mutation values.
    After,
}

/// How a relationship is attached to a payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationshipRule {
    /// Related fields to project. `None` keeps every externally visible field.
    #[serde(default)]
    pub fields: Option<BTreeSet<String>>,
    /// Inclusion gate evaluated against the owning entity.
    #[serde(default)]
    pub condition: Option<Condition>,
}

impl RelationshipRule {
    /// A rule that includes every related field unconditionally.
    #[must_use]
    pub fn all_fields() -> Self {
        Self::default()
    }

    /// Restricts the projected fields.
    #[must_use]
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Adds an inclusion condition.
    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Expiry-driven transition on a timestamp column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalRule {
    /// Timestamp column holding the expiry.
    pub expires_at_field: String,
    /// Column set when the expiry passes.
    #[serde(default)]
    pub status_field: Option<String>,
    /// Value written to `status_field`.
    #[serde(default)]
    pub status_value: Option<Value>,
    /// Scope triggered by the transition. Defaults to the declaring scope.
    #[serde(default)]
    pub fires_scope: Option<String>,
}

impl TemporalRule {
    /// A rule on `expires_at_field` with no status transition.
    #[must_use]
    pub fn new(expires_at_field: impl Into<String>) -> Self {
        Self {
            expires_at_field: expires_at_field.into(),
            status_field: None,
            status_value: None,
            fires_scope: None,
        }
    }

    /// Declares the status column and the value it takes on expiry.
    #[must_use]
    pub fn status(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.status_field = Some(field.into());
        self.status_value = Some(value.into());
        self
    }

    /// Targets another scope of the same entity type.
    #[must_use]
    pub fn fires(mut self, scope: impl Into<String>) -> Self {
        self.fires_scope = Some(scope.into());
        self
    }
}

/// Source of one action parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionParam {
    /// Current value of a column.
    Field(String),
    /// A constant.
    Value(Value),
}

/// Side-effecting action run when the scope triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRule {
    /// Handler key in the action registry.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Runs the action only when this holds.
    #[serde(default)]
    pub condition: Option<ActionCondition>,
    /// Parameters handed to the handler.
    #[serde(default)]
    pub params: BTreeMap<String, ActionParam>,
}

impl ActionRule {
    /// An unconditional action with no parameters.
    #[must_use]
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            condition: None,
            params: BTreeMap::new(),
        }
    }

    /// Gates the action.
    #[must_use]
    pub fn when(mut self, condition: ActionCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Maps a parameter to a column's current value.
    #[must_use]
    pub fn field(mut self, param: impl Into<String>, column: impl Into<String>) -> Self {
        self.params
            .insert(param.into(), ActionParam::Field(column.into()));
        self
    }

    /// Sets a constant parameter.
    #[must_use]
    pub fn constant(mut self, param: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params
            .insert(param.into(), ActionParam::Value(value.into()));
        self
    }
}

/// Registration input for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeSpec {
    /// Local name; the registry prefixes it with the entity's scope prefix.
    pub name: String,
    /// Columns whose change triggers the scope.
    pub trigger_fields: BTreeSet<String>,
    /// Columns in the payload. Defaults to every column.
    #[serde(default)]
    pub payload_fields: Option<BTreeSet<String>>,
    /// Snapshots carried by the payload.
    #[serde(default)]
    pub stage: Stage,
    /// Relationships attached to the payload, by name.
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipRule>,
    /// Expiry-driven transitions.
    #[serde(default)]
    pub temporal_fields: Vec<TemporalRule>,
    /// Actions run when the scope triggers.
    #[serde(default)]
    pub actions: Vec<ActionRule>,
}

impl ScopeSpec {
    /// A scope emitting the post-commit snapshot of every column.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, trigger_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            trigger_fields: trigger_fields.into_iter().map(Into::into).collect(),
            payload_fields: None,
            stage: Stage::After,
            relationships: BTreeMap::new(),
            temporal_fields: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Restricts the payload to `fields`.
    #[must_use]
    pub fn payload_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.payload_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the payload stage.
    #[must_use]
    pub const fn stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    /// Attaches a relationship.
    #[must_use]
    pub fn relationship(mut self, name: impl Into<String>, rule: RelationshipRule) -> Self {
        self.relationships.insert(name.into(), rule);
        self
    }

    /// Adds a temporal rule.
    #[must_use]
    pub fn temporal(mut self, rule: TemporalRule) -> Self {
        self.temporal_fields.push(rule);
        self
    }

    /// Adds an action.
    #[must_use]
    pub fn action(mut self, rule: ActionRule) -> Self {
        self.actions.push(rule);
        self
    }
}

/// A validated temporal rule with its target resolved to a full scope name.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTemporalRule {
    /// Timestamp column holding the expiry.
    pub expires_at_field: String,
    /// Status column and the value synthesized on expiry.
    pub status: Option<(String, Value)>,
    /// Full name of the scope the transition fires.
    pub fires_scope: String,
}

/// Immutable, validated scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeDefinition {
    pub(crate) name: String,
    pub(crate) entity_type: EntityTypeId,
    pub(crate) trigger_fields: BTreeSet<String>,
    pub(crate) payload_fields: Option<BTreeSet<String>>,
    pub(crate) resolved_fields: BTreeSet<String>,
    pub(crate) stage: Stage,
    pub(crate) relationships: BTreeMap<String, RelationshipRule>,
    pub(crate) temporal_rules: Vec<ResolvedTemporalRule>,
    pub(crate) actions: Vec<ActionRule>,
}

impl ScopeDefinition {
    /// Namespaced name, `{prefix}.{local}`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entity type the scope belongs to.
    pub const fn entity_type(&self) -> &EntityTypeId {
        &self.entity_type
    }

    /// Columns whose change triggers the scope.
    pub const fn trigger_fields(&self) -> &BTreeSet<String> {
        &self.trigger_fields
    }

    /// Payload fields as declared, if any.
    pub const fn payload_fields(&self) -> Option<&BTreeSet<String>> {
        self.payload_fields.as_ref()
    }

    /// Columns projected into snapshots: the declared payload fields, or every
    /// column, minus relationship names.
    pub const fn resolved_fields(&self) -> &BTreeSet<String> {
        &self.resolved_fields
    }

    /// Snapshots carried by the payload.
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Relationships by name.
    pub const fn relationships(&self) -> &BTreeMap<String, RelationshipRule> {
        &self.relationships
    }

    /// Temporal rules with resolved targets.
    pub fn temporal_rules(&self) -> &[ResolvedTemporalRule] {
        &self.temporal_rules
    }

    /// Declared actions.
    pub fn actions(&self) -> &[ActionRule] {
        &self.actions
    }

    /// Whether a change to `field` triggers the scope.
    #[must_use]
    pub fn is_trigger(&self, field: &str) -> bool {
        self.trigger_fields.contains(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::condition::Operator;

    #[test]
    fn test_stage_defaults_to_after() {
        assert_eq!(Stage::default(), Stage::After);
        let spec = ScopeSpec::new("amount", ["amount"]);
        assert_eq!(spec.stage, Stage::After);
    }

    #[test]
    fn test_spec_from_json() {
        let spec: ScopeSpec = serde_json::from_value(serde_json::json!({
            "name": "purchase_flow",
            "trigger_fields": ["type", "service_id", "amount"],
            "payload_fields": ["id", "amount", "type"],
            "stage": "both",
            "relationships": {
                "service": {
                    "fields": ["id", "name"],
                    "condition": {"field": "type", "operator": "==", "value": "purchase"}
                }
            },
            "actions": [
                {"type": "update_balance", "params": {"user_id": {"field": "recipient_id"}, "quantity": {"value": 1}}}
            ]
        }))
        .unwrap();

        assert_eq!(spec.stage, Stage::Both);
        let rel = &spec.relationships["service"];
        assert_eq!(rel.condition.as_ref().unwrap().operator, Operator::Eq);
        assert_eq!(spec.actions[0].action_type, "update_balance");
        assert_eq!(
            spec.actions[0].params["user_id"],
            ActionParam::Field("recipient_id".into())
        );
        assert_eq!(spec.actions[0].params["quantity"], ActionParam::Value(Value::Int(1)));
    }

    #[test]
    fn test_conditions_accept_expression_strings() {
        let spec: ScopeSpec = serde_json::from_value(serde_json::json!({
            "name": "created",
            "trigger_fields": ["amount"],
            "relationships": {
                "service": {"condition": "service_id is not None"}
            },
            "actions": [
                {"type": "refund", "condition": "is_refundable"},
                {"type": "update_balance", "condition": "type == \"purchase\""}
            ]
        }))
        .unwrap();

        assert_eq!(
            spec.relationships["service"].condition,
            Some(Condition::new("service_id", Operator::IsNot, Value::Null))
        );
        assert_eq!(
            spec.actions[0].condition,
            Some(ActionCondition::Flag("is_refundable".into()))
        );
        assert_eq!(
            spec.actions[1].condition,
            Some(ActionCondition::Predicate(Condition::new(
                "type",
                Operator::Eq,
                "purchase"
            )))
        );

        let encoded = serde_json::to_value(&spec).unwrap();
        let decoded: ScopeSpec = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn test_malformed_condition_string_is_rejected() {
        let err = serde_json::from_value::<RelationshipRule>(serde_json::json!({
            "condition": "service_id"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("Invalid condition"));
    }

    #[test]
    fn test_temporal_rule_builder() {
        let rule = TemporalRule::new("expires_at")
            .status("status", "expired")
            .fires("expiration");
        assert_eq!(rule.status_value, Some(Value::String("expired".into())));
        assert_eq!(rule.fires_scope.as_deref(), Some("expiration"));
    }
}

//! Conditions gating relationship enrichment and action dispatch.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::entity::EntityState;
use crate::error::{ConfigurationError, EvaluationError};
use crate::value::Value;

/// Comparison operator of a [`Condition`].
///
/// Strings that do not name a supported operator are kept as
/// [`Operator::Unsupported`]; evaluating them fails with
/// [`EvaluationError::UnknownOperator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `is`, strict equality.
    Is,
    /// `is not`
    IsNot,
    /// Any other token, kept verbatim.
    Unsupported(String),
}

impl Operator {
    /// Parses an operator token.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "==" => Self::Eq,
            "!=" => Self::Ne,
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            "is" => Self::Is,
            "is not" | "is-not" | "is_not" => Self::IsNot,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// The canonical token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::Unsupported(token) => token,
        }
    }

    /// Applies the operator to two values.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::UnknownOperator`] for unsupported operators and
    /// [`EvaluationError::IncompatibleTypes`] when an ordering operator is applied
    /// to values without a common order.
    pub fn apply(&self, left: &Value, right: &Value) -> Result<bool, EvaluationError> {
        let ordering = |accept: fn(Ordering) -> bool| {
            left.compare(right)
                .map(accept)
                .ok_or_else(|| EvaluationError::IncompatibleTypes {
                    operator: self.as_str().to_string(),
                    left: left.type_name(),
                    right: right.type_name(),
                })
        };

        match self {
            Self::Eq => Ok(left.loosely_eq(right)),
            Self::Ne => Ok(!left.loosely_eq(right)),
            Self::Is => Ok(left == right),
            Self::IsNot => Ok(left != right),
            Self::Gt => ordering(Ordering::is_gt),
            Self::Lt => ordering(Ordering::is_lt),
            Self::Ge => ordering(Ordering::is_ge),
            Self::Le => ordering(Ordering::is_le),
            Self::Unsupported(token) => Err(EvaluationError::UnknownOperator {
                operator: token.clone(),
            }),
        }
    }
}

impl From<String> for Operator {
    fn from(token: String) -> Self {
        Self::parse(&token)
    }
}

impl From<&str> for Operator {
    fn from(token: &str) -> Self {
        Self::parse(token)
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(field, operator, value)` evaluated against an entity's current values.
///
/// Deserializes from either the structured form or an expression string
/// such as `"service_id is not None"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConditionRepr")]
pub struct Condition {
    /// Column read from the entity.
    pub field: String,
    /// Comparison applied to the column and `value`.
    pub operator: Operator,
    /// Right-hand operand.
    pub value: Value,
}

fn default_operator() -> Operator {
    Operator::Eq
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConditionRepr {
    Expression(String),
    Structured {
        field: String,
        #[serde(default = "default_operator")]
        operator: Operator,
        #[serde(default)]
        value: Value,
    },
}

impl TryFrom<ConditionRepr> for Condition {
    type Error = ConfigurationError;

    fn try_from(repr: ConditionRepr) -> Result<Self, Self::Error> {
        match repr {
            ConditionRepr::Expression(expression) => Self::parse(&expression),
            ConditionRepr::Structured {
                field,
                operator,
                value,
            } => Ok(Self {
                field,
                operator,
                value,
            }),
        }
    }
}

fn expression_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(==|!=|>=|<=|>|<|is\s+not|is)\s+(.+?)\s*$|^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(==|!=|>=|<=|>|<)\s*(.+?)\s*$")
            .unwrap_or_else(|e| unreachable!("condition regex is valid: {e}"))
    })
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*[A-Za-z_][A-Za-z0-9_]*\s*$")
            .unwrap_or_else(|e| unreachable!("identifier regex is valid: {e}"))
    })
}

fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    match raw {
        "null" | "None" => return Value::Null,
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Int(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Value::Float(v);
    }
    let quoted = raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')));
    if quoted {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    Value::String(raw.to_string())
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(field: impl Into<String>, operator: impl Into<Operator>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    /// Parses `field <op> literal`, e.g. `type == "purchase"` or `service_id is not None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidCondition`] if the expression does not
    /// have that shape.
    pub fn parse(expression: &str) -> Result<Self, ConfigurationError> {
        let caps = expression_regex()
            .captures(expression)
            .ok_or_else(|| ConfigurationError::InvalidCondition {
                expression: expression.to_string(),
                reason: "expected `field <operator> value`".to_string(),
            })?;

        let group = |a: usize, b: usize| caps.get(a).or_else(|| caps.get(b)).map(|m| m.as_str());
        let (Some(field), Some(op), Some(literal)) = (group(1, 4), group(2, 5), group(3, 6)) else {
            return Err(ConfigurationError::InvalidCondition {
                expression: expression.to_string(),
                reason: "expected `field <operator> value`".to_string(),
            });
        };

        let op = op.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(Self::new(field, Operator::parse(&op), parse_literal(literal)))
    }

    /// Evaluates the condition against the entity's current values.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or the operator cannot be applied.
    pub fn evaluate(&self, entity: &EntityState) -> Result<bool, EvaluationError> {
        let current = entity
            .current(&self.field)
            .ok_or_else(|| EvaluationError::UnknownField {
                field: self.field.clone(),
            })?;
        self.operator.apply(current, &self.value)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

/// Gate on an action: either a boolean-like column or a full predicate.
///
/// Deserializes from the tagged form (`{"flag": "is_refundable"}`) or from a
/// string, which goes through [`ActionCondition::parse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "ActionConditionRepr")]
pub enum ActionCondition {
    /// The truthiness of the column's current value.
    Flag(String),
    /// A comparison.
    Predicate(Condition),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum TaggedActionCondition {
    Flag(String),
    Predicate(Condition),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ActionConditionRepr {
    Expression(String),
    Tagged(TaggedActionCondition),
}

impl TryFrom<ActionConditionRepr> for ActionCondition {
    type Error = ConfigurationError;

    fn try_from(repr: ActionConditionRepr) -> Result<Self, Self::Error> {
        match repr {
            ActionConditionRepr::Expression(expression) => Self::parse(&expression),
            ActionConditionRepr::Tagged(TaggedActionCondition::Flag(field)) => Ok(Self::Flag(field)),
            ActionConditionRepr::Tagged(TaggedActionCondition::Predicate(condition)) => {
                Ok(Self::Predicate(condition))
            }
        }
    }
}

impl ActionCondition {
    /// Parses a bare identifier as a flag and anything else as a predicate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidCondition`] for malformed predicates.
    pub fn parse(expression: &str) -> Result<Self, ConfigurationError> {
        if identifier_regex().is_match(expression) {
            return Ok(Self::Flag(expression.trim().to_string()));
        }
        Condition::parse(expression).map(Self::Predicate)
    }

    /// The column the condition reads.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Flag(field) => field,
            Self::Predicate(condition) => &condition.field,
        }
    }

    /// Evaluates against the entity's current values.
    ///
    /// # Errors
    ///
    /// Same as [`Condition::evaluate`].
    pub fn evaluate(&self, entity: &EntityState) -> Result<bool, EvaluationError> {
        match self {
            Self::Flag(field) => entity
                .current(field)
                .map(Value::is_truthy)
                .ok_or_else(|| EvaluationError::UnknownField {
                    field: field.clone(),
                }),
            Self::Predicate(condition) => condition.evaluate(entity),
        }
    }
}

/// Condition expressions for Condition nodes
///
/// Expressions are minijinja expressions checked once when the graph is compiled:
/// `balance == 0`, `plan == 'gold' and not vip`, `login.body.user.tier >= 2`,
/// `nickname is undefined`, `balance | int < 10`. An expression wrapped in a
/// single `{{ ... }}` placeholder is accepted as well.
///
/// Paths resolve through `TemplateScope`, so `balance` and `event.balance` read
/// the same context value.

use crate::runtime::template::{self, TemplateScope};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    #[error("empty condition expression")]
    Empty,

    #[error("invalid expression '{source_text}': {message}")]
    Syntax { source_text: String, message: String },

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
}

/// Outcome of evaluating a condition against a scope
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub result: bool,
    /// Paths the expression reads that the scope cannot resolve
    pub missing: Vec<String>,
    /// Runtime error (e.g. an invalid filter argument); the result is then false
    pub error: Option<String>,
}

/// Syntax-checked condition expression
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
}

impl Condition {
    pub fn compile(source: &str) -> Result<Self, ConditionError> {
        let source = unwrap_placeholder(source.trim());
        if source.is_empty() {
            return Err(ConditionError::Empty);
        }
        template::environment()
            .compile_expression(source)
            .map_err(|e| ConditionError::Syntax {
                source_text: source.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            source: source.to_string(),
        })
    }

    /// Build `<field> <op> <value>` from a structured config
    ///
    /// Operators: `==`/`eq`/`equals`, `!=`/`ne`/`not_equals`, `>`/`gt`,
    /// `>=`/`gte`, `<`/`lt`, `<=`/`lte`.
    pub fn comparison(field: &str, operator: &str, value: &JsonValue) -> Result<Self, ConditionError> {
        let field = field.trim();
        if field.is_empty() {
            return Err(ConditionError::Empty);
        }
        let op = match operator.trim() {
            "==" | "=" | "eq" | "equals" => "==",
            "!=" | "ne" | "not_equals" => "!=",
            ">" | "gt" => ">",
            ">=" | "gte" => ">=",
            "<" | "lt" => "<",
            "<=" | "lte" => "<=",
            other => return Err(ConditionError::UnknownOperator(other.to_string())),
        };
        let source = match (value, op) {
            // An absent field counts as null
            (JsonValue::Null, "==") => format!("({0} is none or {0} is undefined)", field),
            (JsonValue::Null, "!=") => format!("not ({0} is none or {0} is undefined)", field),
            (JsonValue::Null, _) => format!("{} {} none", field, op),
            (literal, _) => format!("{} {} {}", field, op, literal),
        };
        Self::compile(&source)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a boolean. Unresolvable paths are undefined, which is falsy and
    /// equal only to other undefined values.
    pub fn evaluate(&self, scope: &TemplateScope<'_>) -> Evaluation {
        let expression = match template::environment().compile_expression(&self.source) {
            Ok(expression) => expression,
            Err(e) => {
                return Evaluation {
                    result: false,
                    missing: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        let missing = scope.missing(&self.source, expression.undeclared_variables(true));
        match expression.eval(scope.to_value()) {
            Ok(value) => Evaluation {
                result: value.is_true(),
                missing,
                error: None,
            },
            Err(e) => Evaluation {
                result: false,
                missing,
                error: Some(e.to_string()),
            },
        }
    }
}

fn unwrap_placeholder(source: &str) -> &str {
    match source.strip_prefix("{{").and_then(|rest| rest.strip_suffix("}}")) {
        Some(inner) if !inner.contains("{{") && !inner.contains("}}") => inner.trim(),
        _ => source,
    }
}

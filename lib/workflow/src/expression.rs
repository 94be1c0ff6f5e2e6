//! Condition expressions and notification templates.
//!
//! Conditions are CEL programs compiled with `cel-interpreter` and run
//! against the run scope, a JSON object built from the trigger payload and
//! prior step outputs. Every top-level scope field is a variable:
//!
//! ```text
//! amount > 1000 && (status == 'full_time' || steps.fetch.hours[1] >= 130)
//! ```
//!
//! Notification recipients and messages are minijinja templates rendered
//! against the same scope. Undefined names are errors, not blanks.

use cel_interpreter::{Context, Program, Value as CelValue};
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Errors from compiling or evaluating a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// The text is not a well-formed expression.
    Compile { reason: String },
    /// Evaluation failed, e.g. an unknown variable or incomparable operands.
    Evaluate { reason: String },
    /// The expression produced something other than a boolean.
    NotBoolean { found: &'static str },
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile { reason } => write!(f, "invalid expression: {reason}"),
            Self::Evaluate { reason } => write!(f, "evaluation failed: {reason}"),
            Self::NotBoolean { found } => write!(f, "expected a boolean, found {found}"),
        }
    }
}

impl std::error::Error for ExpressionError {}

/// A compiled condition expression.
pub struct Expression {
    source: String,
    program: Program,
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Expression {
    /// Compiles an expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a well-formed expression.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let program = Program::compile(source).map_err(|e| ExpressionError::Compile {
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            program,
        })
    }

    /// Returns the original expression text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the expression against a scope.
    ///
    /// # Errors
    ///
    /// Returns an error when evaluation fails or the result is not a boolean.
    pub fn evaluate(&self, scope: &JsonValue) -> Result<bool, ExpressionError> {
        let mut context = Context::default();
        if let JsonValue::Object(fields) = scope {
            for (name, value) in fields {
                context.add_variable_from_value(name.clone(), to_cel(value));
            }
        }

        match self.program.execute(&context) {
            Ok(CelValue::Bool(result)) => Ok(result),
            Ok(other) => Err(ExpressionError::NotBoolean {
                found: type_name(&other),
            }),
            Err(e) => Err(ExpressionError::Evaluate {
                reason: e.to_string(),
            }),
        }
    }
}

/// Integers that fit `i64` become CEL ints so they compare with literals.
fn to_cel(value: &JsonValue) -> CelValue {
    match value {
        JsonValue::Null => CelValue::Null,
        JsonValue::Bool(b) => CelValue::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => CelValue::Int(i),
            None => CelValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => CelValue::String(Arc::new(s.clone())),
        JsonValue::Array(items) => CelValue::List(Arc::new(items.iter().map(to_cel).collect())),
        JsonValue::Object(map) => map
            .iter()
            .map(|(key, value)| (key.clone(), to_cel(value)))
            .collect::<HashMap<String, CelValue>>()
            .into(),
    }
}

fn type_name(value: &CelValue) -> &'static str {
    match value {
        CelValue::Null => "null",
        CelValue::Bool(_) => "bool",
        CelValue::Int(_) | CelValue::UInt(_) | CelValue::Float(_) => "number",
        CelValue::String(_) => "string",
        CelValue::List(_) => "list",
        CelValue::Map(_) => "map",
        _ => "value",
    }
}

/// A template that failed to compile or render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    /// The template text.
    pub template: String,
    /// What minijinja reported.
    pub reason: String,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template '{}' failed: {}", self.template, self.reason)
    }
}

impl std::error::Error for TemplateError {}

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

/// Checks that a template compiles without rendering it.
///
/// # Errors
///
/// Returns an error on template syntax errors.
pub fn check_template(template: &str) -> Result<(), TemplateError> {
    environment()
        .template_from_str(template)
        .map(|_| ())
        .map_err(|e| TemplateError {
            template: template.to_string(),
            reason: e.to_string(),
        })
}

/// Renders `{{ path }}` placeholders from the scope.
///
/// # Errors
///
/// Returns an error on syntax errors and on names the scope does not define.
pub fn render_template(template: &str, scope: &JsonValue) -> Result<String, TemplateError> {
    environment()
        .render_str(template, scope)
        .map_err(|e| TemplateError {
            template: template.to_string(),
            reason: e.to_string(),
        })
}

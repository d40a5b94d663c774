//! Expression engines
//!
//! The core only ever talks to an engine through [`ExpressionEngine`]. This
//! module also ships the reference engine used by the CLI and the tests: a
//! small C-like expression language with two flavours.
//!
//! | name       | verdict of a non-boolean value |
//! |------------|--------------------------------|
//! | `standard` | truthiness                     |
//! | `strict`   | `MalformedExpression`          |

pub mod ast;
mod eval;
pub mod parser;
pub mod tokenizer;

use std::sync::Arc;

use crate::bindings::BindingContext;
use crate::value::Value;
use crate::{Error, Result};

use eval::Interpreter;

/// Names accepted by [`by_name`]
pub const ENGINE_NAMES: &[&str] = &["standard", "strict"];

/// A pluggable evaluator of boolean contract expressions.
///
/// Engines are stateless: all variables come from the `BindingContext`
/// passed to each call, so one engine can serve any number of threads.
pub trait ExpressionEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluate `expression` to a value
    fn evaluate(&self, expression: &str, bindings: &BindingContext) -> Result<Value>;

    /// Check that `expression` is well formed without evaluating it
    fn validate(&self, expression: &str) -> Result<()>;

    /// Evaluate `expression` to a verdict
    fn condition(&self, expression: &str, bindings: &BindingContext) -> Result<bool>;
}

/// The reference engine
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardEngine {
    strict: bool,
}

impl StandardEngine {
    pub fn new() -> Self {
        StandardEngine { strict: false }
    }

    pub fn strict() -> Self {
        StandardEngine { strict: true }
    }
}

impl ExpressionEngine for StandardEngine {
    fn name(&self) -> &str {
        if self.strict {
            "strict"
        } else {
            "standard"
        }
    }

    fn evaluate(&self, expression: &str, bindings: &BindingContext) -> Result<Value> {
        let tree = parser::parse(expression)?;
        let value = Interpreter::new(expression, bindings, self.strict).eval(&tree)?;
        tracing::trace!(expression, %value, "evaluated");
        Ok(value)
    }

    fn validate(&self, expression: &str) -> Result<()> {
        parser::parse(expression).map(|_| ())
    }

    fn condition(&self, expression: &str, bindings: &BindingContext) -> Result<bool> {
        let tree = parser::parse(expression)?;
        let interpreter = Interpreter::new(expression, bindings, self.strict);
        let value = interpreter.eval(&tree)?;
        interpreter.truth(&value)
    }
}

/// Look up a built-in engine by its configuration name
pub fn by_name(name: &str) -> Result<Arc<dyn ExpressionEngine>> {
    match name {
        "standard" => Ok(Arc::new(StandardEngine::new())),
        "strict" => Ok(Arc::new(StandardEngine::strict())),
        other => Err(Error::Config(format!(
            "unknown expression engine '{}' (expected one of: {})",
            other,
            ENGINE_NAMES.join(", ")
        ))),
    }
}

//! The embedded expression evaluator.
//!
//! Evaluates the JavaScript expression subset used in pipeline configs
//! (`$js:` values and `js` step code): literals, property access, array
//! indexing, arithmetic, string concatenation, comparisons, logical
//! operators, the ternary operator, and a small method set on strings,
//! arrays, and numbers.
//!
//! Every evaluation runs against a fresh [`Scope`] built from one input
//! envelope; no state survives between events. The scope exposes three
//! roots:
//!
//! - `ctx` - producer-id → payload (collapsed to the `default` payload when
//!   that is the producer's sole output), plus `ctx._execution.id`
//! - `$vars` - the pipeline's global variables
//! - `$secrets` - the pipeline's global secrets

mod eval;
mod lexer;
mod parser;

pub use eval::Scope;

pub(crate) use eval::to_display_string;

use crate::error::{Error, Result};
use serde_json::Value as JsonValue;

/// Evaluate an expression against a scope.
///
/// Parse and runtime failures surface as [`Error::Expression`] naming the
/// expression.
pub fn evaluate(expression: &str, scope: &Scope) -> Result<JsonValue> {
    let failed = |cause: String| Error::Expression {
        expression: expression.to_string(),
        cause,
    };

    let tokens = lexer::tokenize(expression).map_err(&failed)?;
    let ast = parser::parse(&tokens).map_err(&failed)?;
    eval::eval(&ast, scope).map_err(failed)
}

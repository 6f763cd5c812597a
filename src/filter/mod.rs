//! Filter expression engine.
//!
//! Connections carry an optional boolean rule tree over article fields
//! (including `custom::` placeholder fields). The engine evaluates the tree
//! per article, aggregates rule errors across the whole tree, and can report
//! each leaf's result for diagnostics.

mod evaluator;
mod expression;
mod validate;

use serde::Serialize;
use thiserror::Error;

pub use evaluator::{evaluate, CompiledFilter, FilterOutcome, LeafResult};
pub use expression::{FilterExpression, LogicalOperator, Operand, RelationalOperator};
pub use validate::{validate, MAX_DEPTH};

/// A problem with a filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FilterError {
    /// A regular expression that does not compile.
    #[error("{path}: invalid regular expression {pattern:?}: {message}")]
    InvalidRegex {
        path: String,
        pattern: String,
        message: String,
    },

    /// A structurally invalid node.
    #[error("{path}: {message}")]
    Invalid { path: String, message: String },
}

impl FilterError {
    /// Path of the offending node.
    pub fn path(&self) -> &str {
        match self {
            FilterError::InvalidRegex { path, .. } | FilterError::Invalid { path, .. } => path,
        }
    }
}

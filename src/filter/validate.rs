//! Structural validation of filter expressions.

use super::expression::{FilterExpression, Operand};
use super::FilterError;

/// Maximum nesting depth of a filter tree.
pub const MAX_DEPTH: usize = 10;

/// Validate an expression before it is stored.
///
/// Returns every problem found, each tagged with the path of the node.
pub fn validate(expression: &FilterExpression) -> Vec<FilterError> {
    let mut errors = Vec::new();
    walk(expression, "root", 1, &mut errors);
    errors
}

fn walk(expr: &FilterExpression, path: &str, depth: usize, errors: &mut Vec<FilterError>) {
    if depth > MAX_DEPTH {
        errors.push(FilterError::Invalid {
            path: path.to_string(),
            message: format!("nesting exceeds {MAX_DEPTH} levels"),
        });
        return;
    }

    match expr {
        FilterExpression::Logical { children, .. } => {
            for (i, child) in children.iter().enumerate() {
                walk(child, &format!("{path}.children[{i}]"), depth + 1, errors);
            }
        }
        FilterExpression::Not { child } => walk(child, &format!("{path}.child"), depth + 1, errors),
        FilterExpression::Relational { op, left, right } => {
            if left.trim().is_empty() {
                errors.push(FilterError::Invalid {
                    path: format!("{path}.left"),
                    message: "field name must not be empty".to_string(),
                });
            }
            match right {
                Operand::Field(name) if name.trim().is_empty() => {
                    errors.push(FilterError::Invalid {
                        path: format!("{path}.right"),
                        message: "field name must not be empty".to_string(),
                    });
                }
                Operand::String(pattern) if op.is_regex() => {
                    if pattern.is_empty() {
                        errors.push(FilterError::Invalid {
                            path: format!("{path}.right"),
                            message: "regular expression must not be empty".to_string(),
                        });
                    } else if let Err(e) = regex::Regex::new(pattern) {
                        errors.push(FilterError::InvalidRegex {
                            path: format!("{path}.right"),
                            pattern: pattern.clone(),
                            message: e.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
    }
}

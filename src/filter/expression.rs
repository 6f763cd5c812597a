//! Filter expression tree.

use serde::{Deserialize, Serialize};

/// A boolean rule over article fields.
///
/// Serialized with a `type` tag:
///
/// ```json
/// {"type": "LOGICAL", "op": "AND", "children": [
///   {"type": "RELATIONAL", "op": "CONTAINS", "left": "title",
///    "right": {"type": "STRING", "value": "rust"}}
/// ]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterExpression {
    /// Conjunction or disjunction of child expressions.
    Logical {
        op: LogicalOperator,
        #[serde(default)]
        children: Vec<FilterExpression>,
    },
    /// Negation of a child expression.
    Not { child: Box<FilterExpression> },
    /// Comparison of an article field against an operand.
    Relational {
        op: RelationalOperator,
        left: String,
        right: Operand,
    },
}

/// Logical combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalOperator {
    And,
    Or,
}

/// Relational comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationalOperator {
    /// Exact equality.
    Eq,
    /// Exact inequality.
    NotEq,
    /// Case-insensitive substring match.
    Contains,
    /// Negated case-insensitive substring match.
    NotContains,
    /// Case-insensitive regular expression match.
    Matches,
    /// Negated case-insensitive regular expression match.
    NotMatches,
}

impl RelationalOperator {
    /// Whether the operand is a regular expression.
    pub fn is_regex(self) -> bool {
        matches!(self, Self::Matches | Self::NotMatches)
    }

    /// Whether the raw comparison result is inverted.
    pub fn is_negated(self) -> bool {
        matches!(self, Self::NotEq | Self::NotContains | Self::NotMatches)
    }
}

/// Right-hand side of a relational expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operand {
    /// A literal string.
    String(String),
    /// Another article field.
    Field(String),
}

impl FilterExpression {
    /// All children must pass.
    pub fn and(children: Vec<FilterExpression>) -> Self {
        Self::Logical {
            op: LogicalOperator::And,
            children,
        }
    }

    /// At least one child must pass.
    pub fn or(children: Vec<FilterExpression>) -> Self {
        Self::Logical {
            op: LogicalOperator::Or,
            children,
        }
    }

    /// Negate an expression.
    pub fn negate(child: FilterExpression) -> Self {
        Self::Not {
            child: Box::new(child),
        }
    }

    /// Compare a field against a literal.
    pub fn literal(left: impl Into<String>, op: RelationalOperator, value: impl Into<String>) -> Self {
        Self::Relational {
            op,
            left: left.into(),
            right: Operand::String(value.into()),
        }
    }

    /// Compare a field against another field.
    pub fn field(left: impl Into<String>, op: RelationalOperator, other: impl Into<String>) -> Self {
        Self::Relational {
            op,
            left: left.into(),
            right: Operand::Field(other.into()),
        }
    }
}

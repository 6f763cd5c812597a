//! Filter evaluation.
//!
//! Expressions are compiled once per connection, which builds every regular
//! expression up front and collects all compile failures. A leaf whose
//! pattern failed to compile evaluates to *unknown*; the aggregate uses
//! three-valued logic and passes only when it is definitely true.

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use super::expression::{FilterExpression, LogicalOperator, Operand, RelationalOperator};
use super::FilterError;

/// Upper bound on compiled regex size.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Three-valued truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    fn from_bool(value: bool) -> Self {
        if value {
            Truth::True
        } else {
            Truth::False
        }
    }

    fn not(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }
}

/// Result of one leaf, reported in diagnostics mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafResult {
    /// Location of the leaf in the tree, e.g. `root.children[1]`.
    pub path: String,
    /// Field on the left side.
    pub field: String,
    /// Operator applied.
    pub op: RelationalOperator,
    /// Resolved right-hand value.
    pub reference_value: String,
    /// Resolved left-hand value.
    pub field_value: String,
    /// Leaf result, `None` when the leaf could not be evaluated.
    pub result: Option<bool>,
}

/// Outcome of evaluating a filter against one article.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterOutcome {
    /// Whether the article passes.
    pub passed: bool,
    /// Rule errors found while compiling or evaluating.
    pub errors: Vec<FilterError>,
    /// Per-leaf results, only when diagnostics were requested.
    pub leaves: Option<Vec<LeafResult>>,
}

enum Matcher {
    Literal(String),
    Field(String),
    Pattern(Regex),
    /// Literal pattern that failed to compile.
    Broken,
}

enum Node {
    Logical {
        op: LogicalOperator,
        children: Vec<Node>,
    },
    Not(Box<Node>),
    Leaf {
        path: String,
        op: RelationalOperator,
        field: String,
        matcher: Matcher,
        reference: String,
    },
}

/// A filter with its regular expressions compiled.
pub struct CompiledFilter {
    root: Option<Node>,
    errors: Vec<FilterError>,
}

impl CompiledFilter {
    /// Compile an optional expression. An absent expression passes everything.
    pub fn compile(expression: Option<&FilterExpression>) -> Self {
        let mut errors = Vec::new();
        let root = expression.map(|expr| compile_node(expr, "root".to_string(), &mut errors));
        Self { root, errors }
    }

    /// Compile errors across the whole tree.
    pub fn errors(&self) -> &[FilterError] {
        &self.errors
    }

    /// Evaluate against an article's fields.
    ///
    /// Missing fields resolve to the empty string. With `diagnostics` every
    /// leaf is evaluated and reported; the aggregate result is the same.
    pub fn evaluate(&self, fields: &BTreeMap<String, String>, diagnostics: bool) -> FilterOutcome {
        let Some(root) = &self.root else {
            return FilterOutcome {
                passed: true,
                errors: Vec::new(),
                leaves: diagnostics.then(Vec::new),
            };
        };

        let mut ctx = EvalContext {
            fields,
            diagnostics,
            errors: self.errors.clone(),
            leaves: Vec::new(),
        };
        let truth = ctx.eval(root);

        FilterOutcome {
            passed: truth == Truth::True,
            errors: ctx.errors,
            leaves: diagnostics.then_some(ctx.leaves),
        }
    }
}

/// Compile and evaluate in one step.
pub fn evaluate(
    expression: Option<&FilterExpression>,
    fields: &BTreeMap<String, String>,
    diagnostics: bool,
) -> FilterOutcome {
    CompiledFilter::compile(expression).evaluate(fields, diagnostics)
}

fn build_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
}

fn compile_node(expr: &FilterExpression, path: String, errors: &mut Vec<FilterError>) -> Node {
    match expr {
        FilterExpression::Logical { op, children } => Node::Logical {
            op: *op,
            children: children
                .iter()
                .enumerate()
                .map(|(i, child)| compile_node(child, format!("{path}.children[{i}]"), errors))
                .collect(),
        },
        FilterExpression::Not { child } => {
            Node::Not(Box::new(compile_node(child, format!("{path}.child"), errors)))
        }
        FilterExpression::Relational { op, left, right } => {
            let (matcher, reference) = match right {
                Operand::Field(name) => (Matcher::Field(name.clone()), name.clone()),
                Operand::String(value) if op.is_regex() => match build_regex(value) {
                    Ok(regex) => (Matcher::Pattern(regex), value.clone()),
                    Err(e) => {
                        errors.push(FilterError::InvalidRegex {
                            path: path.clone(),
                            pattern: value.clone(),
                            message: e.to_string(),
                        });
                        (Matcher::Broken, value.clone())
                    }
                },
                Operand::String(value) => (Matcher::Literal(value.clone()), value.clone()),
            };
            Node::Leaf {
                path,
                op: *op,
                field: left.clone(),
                matcher,
                reference,
            }
        }
    }
}

struct EvalContext<'a> {
    fields: &'a BTreeMap<String, String>,
    diagnostics: bool,
    errors: Vec<FilterError>,
    leaves: Vec<LeafResult>,
}

impl<'a> EvalContext<'a> {
    fn value(&self, field: &str) -> &'a str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }

    fn eval(&mut self, node: &Node) -> Truth {
        match node {
            Node::Logical { op, children } => {
                // Empty groups pass.
                let mut result = Truth::True;
                if *op == LogicalOperator::Or && !children.is_empty() {
                    result = Truth::False;
                }

                for child in children {
                    let truth = self.eval(child);
                    match (op, truth) {
                        (LogicalOperator::And, Truth::False) => result = Truth::False,
                        (LogicalOperator::And, Truth::Unknown) if result != Truth::False => {
                            result = Truth::Unknown
                        }
                        (LogicalOperator::Or, Truth::True) => result = Truth::True,
                        (LogicalOperator::Or, Truth::Unknown) if result != Truth::True => {
                            result = Truth::Unknown
                        }
                        _ => {}
                    }

                    let decided = match op {
                        LogicalOperator::And => result == Truth::False,
                        LogicalOperator::Or => result == Truth::True,
                    };
                    if decided && !self.diagnostics {
                        break;
                    }
                }
                result
            }
            Node::Not(child) => self.eval(child).not(),
            Node::Leaf {
                path,
                op,
                field,
                matcher,
                reference,
            } => {
                let field_value = self.value(field);
                let (truth, reference_value) = match matcher {
                    Matcher::Literal(literal) => {
                        (Truth::from_bool(compare(*op, field_value, literal)), literal.clone())
                    }
                    Matcher::Pattern(regex) => {
                        (Truth::from_bool(regex.is_match(field_value)), reference.clone())
                    }
                    Matcher::Broken => (Truth::Unknown, reference.clone()),
                    Matcher::Field(other) => {
                        let other_value = self.value(other);
                        if op.is_regex() {
                            match build_regex(other_value) {
                                Ok(regex) => (
                                    Truth::from_bool(regex.is_match(field_value)),
                                    other_value.to_string(),
                                ),
                                Err(e) => {
                                    self.errors.push(FilterError::InvalidRegex {
                                        path: path.clone(),
                                        pattern: other_value.to_string(),
                                        message: e.to_string(),
                                    });
                                    (Truth::Unknown, other_value.to_string())
                                }
                            }
                        } else {
                            (
                                Truth::from_bool(compare(*op, field_value, other_value)),
                                other_value.to_string(),
                            )
                        }
                    }
                };

                let truth = if op.is_negated() { truth.not() } else { truth };

                if self.diagnostics {
                    self.leaves.push(LeafResult {
                        path: path.clone(),
                        field: field.clone(),
                        op: *op,
                        reference_value,
                        field_value: field_value.to_string(),
                        result: match truth {
                            Truth::True => Some(true),
                            Truth::False => Some(false),
                            Truth::Unknown => None,
                        },
                    });
                }
                truth
            }
        }
    }
}

/// Non-regex comparison before negation is applied.
fn compare(op: RelationalOperator, value: &str, reference: &str) -> bool {
    match op {
        RelationalOperator::Eq | RelationalOperator::NotEq => value == reference,
        RelationalOperator::Contains | RelationalOperator::NotContains => value
            .to_lowercase()
            .contains(&reference.to_lowercase()),
        RelationalOperator::Matches | RelationalOperator::NotMatches => false,
    }
}

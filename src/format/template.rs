//! Placeholder template parser and renderer.
//!
//! Templates are plain text with `{{name}}` placeholders. With fallbacks
//! enabled a placeholder may list alternatives, `{{a||b||text::literal}}`;
//! the first non-empty one is used. `\{{` produces a literal `{{`.

use std::collections::BTreeMap;

/// Prefix marking a literal fallback.
pub const LITERAL_PREFIX: &str = "text::";

/// A source a placeholder can draw its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Article field.
    Field(String),
    /// Literal text.
    Literal(String),
}

/// A node in a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Raw text content.
    Text(String),

    /// Placeholder: `{{name}}` or `{{a||b||text::c}}`
    Placeholder(Vec<Source>),
}

/// Template parser.
pub struct Parser<'a> {
    input: &'a str,
    pos: usize,
    fallbacks: bool,
}

impl<'a> Parser<'a> {
    /// Create a new parser for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            fallbacks: false,
        }
    }

    /// Interpret `||` as a list of alternatives.
    pub fn with_fallbacks(mut self, fallbacks: bool) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Parse the template into a list of nodes.
    ///
    /// An unterminated `{{` is kept as text.
    pub fn parse(mut self) -> Vec<Node> {
        let mut nodes = Vec::new();

        while self.pos < self.input.len() {
            if self.peek_str("\\{{") {
                self.pos += 3;
                push_text(&mut nodes, "{{");
            } else if self.peek_str("{{") {
                match self.parse_placeholder() {
                    Some(node) => nodes.push(node),
                    None => {
                        let rest = &self.input[self.pos..];
                        push_text(&mut nodes, rest);
                        self.pos = self.input.len();
                    }
                }
            } else {
                let text = self.collect_text();
                push_text(&mut nodes, text);
            }
        }

        nodes
    }

    /// Parse a single placeholder tag.
    fn parse_placeholder(&mut self) -> Option<Node> {
        let start = self.pos + 2;
        let end = start + self.input[start..].find("}}")?;
        let accessor = self.input[start..end].trim();
        self.pos = end + 2;

        let sources = if self.fallbacks {
            accessor.split("||").map(parse_source).collect()
        } else {
            vec![Source::Field(accessor.to_string())]
        };

        Some(Node::Placeholder(sources))
    }

    /// Collect text until the next tag or escape sequence.
    fn collect_text(&mut self) -> &'a str {
        let start = self.pos;

        while self.pos < self.input.len() {
            if self.peek_str("{{") || self.peek_str("\\{{") {
                break;
            }
            self.advance();
        }

        &self.input[start..self.pos]
    }

    /// Check if the input starts with the given string at current position.
    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    /// Advance position by one character.
    fn advance(&mut self) {
        if let Some(ch) = self.input[self.pos..].chars().next() {
            self.pos += ch.len_utf8();
        }
    }
}

fn parse_source(part: &str) -> Source {
    match part.strip_prefix(LITERAL_PREFIX) {
        Some(literal) => Source::Literal(literal.to_string()),
        None => Source::Field(part.trim().to_string()),
    }
}

/// Merge adjacent text nodes.
fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Text(last)) = nodes.last_mut() {
        last.push_str(text);
    } else {
        nodes.push(Node::Text(text.to_string()));
    }
}

/// Template renderer over an article's field map.
pub struct Renderer<'a> {
    fields: &'a BTreeMap<String, String>,
}

impl<'a> Renderer<'a> {
    /// Create a new renderer with the given fields.
    pub fn new(fields: &'a BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    /// Render a list of nodes to a string.
    pub fn render(&self, nodes: &[Node]) -> String {
        let mut output = String::new();

        for node in nodes {
            match node {
                Node::Text(text) => output.push_str(text),
                Node::Placeholder(sources) => output.push_str(self.resolve(sources)),
            }
        }

        output
    }

    /// First non-empty source; missing fields render as empty strings.
    fn resolve<'s>(&'s self, sources: &'s [Source]) -> &'s str {
        for source in sources {
            match source {
                // Literals always win once reached
                Source::Literal(text) => return text,
                Source::Field(name) => {
                    if let Some(value) = self.fields.get(name).filter(|v| !v.is_empty()) {
                        return value;
                    }
                }
            }
        }
        ""
    }
}

/// Parse and render a template in one step.
pub fn render_template(
    template: &str,
    fields: &BTreeMap<String, String>,
    fallbacks: bool,
) -> String {
    let nodes = Parser::new(template).with_fallbacks(fallbacks).parse();
    Renderer::new(fields).render(&nodes)
}

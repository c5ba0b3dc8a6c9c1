//! Interaction scripts.
//!
//! A script is the console transcript a test expects to see, with
//! directives embedded:
//!
//! - `{{name}}` substitutes a bound value,
//! - `{{if name}} … {{end}}` keeps its body only when the condition holds,
//! - `{{input "text"}}` sends `text` as a line of input at that point and
//!   expects `text` echoed back. The line end that follows the echo belongs
//!   to the surrounding script.
//!
//! ```
//! use attachbox::template::{self, Bindings, Node};
//!
//! let bindings = Bindings::new().constant("who", "node").flag("verbose", false);
//! let script = template::compile(
//!     "hello {{who}}\n{{if verbose}}debug\n{{end}}> {{input \"exit\"}}\n",
//!     &bindings,
//! )?;
//! assert_eq!(script.expected_text(true), "hello node\n> exit\n");
//! assert!(script
//!     .nodes()
//!     .iter()
//!     .any(|node| matches!(node, Node::Input { text } if text == "exit")));
//! # Ok::<(), attachbox::HarnessError>(())
//! ```

mod bindings;
mod parse;

pub use bindings::{Binding, Bindings};

use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::NodeKind;
use parse::Segment;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};

/// A compiled script element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Literal { text: String },
    Field { name: String, value: String },
    /// Body holds only literal and field nodes; empty when disabled.
    Conditional {
        name: String,
        enabled: bool,
        body: Vec<Node>,
    },
    Input { text: String },
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Literal { .. } => NodeKind::Literal,
            Self::Field { .. } => NodeKind::Field,
            Self::Conditional { .. } => NodeKind::Conditional,
            Self::Input { .. } => NodeKind::Input,
        }
    }

    /// Bytes this node expects on a session that does or does not echo input.
    pub fn expected(&self, echoes: bool) -> String {
        match self {
            Self::Literal { text } => text.clone(),
            Self::Field { value, .. } => value.clone(),
            Self::Conditional { enabled, body, .. } => {
                if *enabled {
                    body.iter().map(|node| node.expected(echoes)).collect()
                } else {
                    String::new()
                }
            }
            Self::Input { text } if echoes => text.clone(),
            Self::Input { .. } => String::new(),
        }
    }
}

/// Ordered, fully resolved node list ready for the driver.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    nodes: Vec<Node>,
}

impl Script {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of input injections.
    pub fn input_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, Node::Input { .. }))
            .count()
    }

    /// The whole transcript the script expects.
    pub fn expected_text(&self, echoes: bool) -> String {
        self.nodes.iter().map(|node| node.expected(echoes)).collect()
    }
}

/// A parsed script, not yet bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse raw script text.
    ///
    /// A single leading newline is dropped so scripts can begin on the line
    /// after an opening quote.
    ///
    /// # Errors
    /// `E_TEMPLATE_SYNTAX` for malformed directives, nested conditionals,
    /// input inside a conditional, or an unclosed block.
    pub fn parse(raw: &str) -> HarnessResult<Self> {
        Ok(Self {
            segments: parse::parse(raw)?,
        })
    }

    /// Every placeholder and condition name referenced, in first-use order.
    pub fn placeholders(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        let mut note = |name: &str| {
            if seen.insert(name.to_string()) {
                names.push(name.to_string());
            }
        };
        for segment in &self.segments {
            match segment {
                Segment::Field(name) => note(name),
                Segment::Conditional { name, body } => {
                    note(name);
                    for inner in body {
                        if let Segment::Field(field) = inner {
                            note(field);
                        }
                    }
                }
                Segment::Text(_) | Segment::Input(_) => {}
            }
        }
        names
    }

    /// Names referenced by the template that `bindings` does not cover.
    pub fn unknown_placeholders(&self, bindings: &Bindings) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|name| !bindings.contains(name))
            .collect()
    }

    /// Resolve every placeholder and produce the node list.
    ///
    /// # Errors
    /// - `E_UNKNOWN_PLACEHOLDER`: a name has no binding
    /// - `E_UNRESOLVED_PLACEHOLDER`: a binding returned nothing or is of the wrong kind
    pub fn compile(&self, bindings: &Bindings) -> HarnessResult<Script> {
        let unknown = self.unknown_placeholders(bindings);
        if let Some(first) = unknown.first() {
            return Err(HarnessError::new(
                ErrorCode::UnknownPlaceholder,
                format!("script references unknown placeholder '{first}'"),
                json!({
                    "unknown": unknown,
                    "known": bindings.names().collect::<Vec<_>>(),
                }),
            ));
        }

        let mut resolver = Resolver::new(bindings);
        let mut nodes = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let node = match segment {
                Segment::Text(text) => Node::Literal { text: text.clone() },
                Segment::Field(name) => resolver.field(name)?,
                Segment::Input(text) => Node::Input { text: text.clone() },
                Segment::Conditional { name, body } => {
                    let enabled = resolver.condition(name)?;
                    let body = if enabled {
                        body.iter()
                            .map(|inner| match inner {
                                Segment::Field(field) => resolver.field(field),
                                Segment::Text(text) => Ok(Node::Literal { text: text.clone() }),
                                Segment::Conditional { .. } | Segment::Input(_) => Err(
                                    HarnessError::template("unexpected directive in conditional body", None),
                                ),
                            })
                            .collect::<HarnessResult<Vec<_>>>()?
                    } else {
                        Vec::new()
                    };
                    Node::Conditional {
                        name: name.clone(),
                        enabled,
                        body,
                    }
                }
            };
            nodes.push(node);
        }
        tracing::debug!(nodes = nodes.len(), "compiled script");
        Ok(Script { nodes })
    }
}

/// Parse and compile in one step.
pub fn compile(raw: &str, bindings: &Bindings) -> HarnessResult<Script> {
    Template::parse(raw)?.compile(bindings)
}

enum Evaluated {
    Value(Option<String>),
    Condition(Option<bool>),
}

/// Evaluates each binding at most once.
struct Resolver<'a> {
    bindings: &'a Bindings,
    cache: HashMap<String, Evaluated>,
}

impl<'a> Resolver<'a> {
    fn new(bindings: &'a Bindings) -> Self {
        Self {
            bindings,
            cache: HashMap::new(),
        }
    }

    fn evaluate(&mut self, name: &str) -> HarnessResult<&Evaluated> {
        if !self.cache.contains_key(name) {
            let binding = self.bindings.get(name).ok_or_else(|| {
                HarnessError::new(
                    ErrorCode::UnknownPlaceholder,
                    format!("script references unknown placeholder '{name}'"),
                    json!({ "name": name }),
                )
            })?;
            let evaluated = match binding {
                Binding::Value(f) => Evaluated::Value(f()),
                Binding::Condition(f) => Evaluated::Condition(f()),
            };
            self.cache.insert(name.to_string(), evaluated);
        }
        self.cache
            .get(name)
            .ok_or_else(|| HarnessError::internal("binding cache lost an entry"))
    }

    fn field(&mut self, name: &str) -> HarnessResult<Node> {
        match self.evaluate(name)? {
            Evaluated::Value(Some(value)) => Ok(Node::Field {
                name: name.to_string(),
                value: value.clone(),
            }),
            Evaluated::Value(None) => Err(unresolved(name, "value binding produced nothing")),
            Evaluated::Condition(_) => Err(unresolved(name, "expected a value, found a condition")),
        }
    }

    fn condition(&mut self, name: &str) -> HarnessResult<bool> {
        match self.evaluate(name)? {
            Evaluated::Condition(Some(enabled)) => Ok(*enabled),
            Evaluated::Condition(None) => Err(unresolved(name, "condition binding produced nothing")),
            Evaluated::Value(_) => Err(unresolved(name, "expected a condition, found a value")),
        }
    }
}

fn unresolved(name: &str, reason: &str) -> HarnessError {
    HarnessError::new(
        ErrorCode::UnresolvedPlaceholder,
        format!("placeholder '{name}' could not be resolved: {reason}"),
        json!({ "name": name, "reason": reason }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_newline_is_dropped_once() {
        let template = Template::parse("\n\nabc").unwrap();
        let script = template.compile(&Bindings::new()).unwrap();
        assert_eq!(script.expected_text(true), "\nabc");
    }

    #[test]
    fn placeholders_are_deduplicated_in_order() {
        let template = Template::parse("{{b}}{{a}}{{if c}}{{b}}{{d}}{{end}}").unwrap();
        assert_eq!(template.placeholders(), vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn whitespace_inside_braces_is_ignored() {
        let bindings = Bindings::new().constant("x", "1").flag("on", true);
        let script = compile("{{ x }}{{  if on }}y{{ end }}{{ input  \"q\" }}", &bindings).unwrap();
        assert_eq!(script.expected_text(true), "1yq");
        assert_eq!(script.expected_text(false), "1y");
    }
}

//! Abstract syntax tree interface
//!
//! The tree is produced by an external parser. Every node is a tagged record
//! `{kind, children, file, line}`; children are nested nodes, names/strings,
//! numbers, or an explicit absent marker. Trees can be built in Rust,
//! deserialized from JSON, or read from the s-expression form in [`sexp`].
//!
//! Node kinds understood by the compiler:
//!
//! | kind | children |
//! |------|----------|
//! | `block`, `begin` | statements |
//! | `nil` `true` `false` `self` | - |
//! | `lit` | integer or float |
//! | `str` / `sym` | text |
//! | `dstr` | parts (nodes, or text) |
//! | `array` | elements, `(splat e)` allowed |
//! | `hash` | key, value, key, value... |
//! | `dot2` / `dot3` | low, high |
//! | `lvar` `ivar` `gvar` `cvar` `const` | name |
//! | `lasgn` `iasgn` `gasgn` `cvasgn` `cdecl` | name, value (value omitted as a masgn target) |
//! | `colon2` / `colon3` | scope, name / name |
//! | `and` `or` `not` | operands |
//! | `if` | cond, then, else |
//! | `while` `until` | cond, body, optional `post` marker |
//! | `case` | subject, `(when (array pats...) body)`..., else |
//! | `masgn` | `(array targets...)`, value |
//! | `op_asgn_or` / `op_asgn_and` | read, assignment |
//! | `call` | receiver, name, args (`(splat e)`, trailing `(block_pass e)`) |
//! | `attrasgn` | receiver, `name=`, args |
//! | `iter` | call/super/zsuper, `(args ...)`, body |
//! | `lambda` | `(args ...)`, body |
//! | `yield` `super` | args |
//! | `zsuper` | - |
//! | `break` `next` `return` | optional value |
//! | `redo` `retry` | - |
//! | `rescue` | body, `(resbody (array pats...) var body)`..., optional else |
//! | `ensure` | body, ensure body |
//! | `defn` | name, `(args ...)`, body |
//! | `defs` | receiver, name, `(args ...)`, body |
//! | `class` | name or `colon2`/`colon3`, superclass, body |
//! | `module` | name, body |
//! | `sclass` | receiver, body |
//! | `alias` / `undef` | names |
//!
//! Parameter lists are `(args a (optarg b default) (restarg c) (kwarg d default?) (blockarg e))`.

pub mod sexp;

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// One syntax tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: String,
    #[serde(default)]
    pub children: Vec<Child>,
    /// Source file; empty means "inherit from the enclosing node"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(default)]
    pub line: u32,
}

/// A child slot of a [`Node`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Child {
    Nil,
    Int(i64),
    Float(f64),
    Text(String),
    Node(Box<Node>),
}

impl Node {
    pub fn new(kind: impl Into<String>, children: Vec<Child>, line: u32) -> Self {
        Self {
            kind: kind.into(),
            children,
            file: String::new(),
            line,
        }
    }

    pub fn child(&self, index: usize) -> Option<&Child> {
        self.children.get(index)
    }

    /// The child at `index` if it is a node
    pub fn node(&self, index: usize) -> Option<&Node> {
        match self.children.get(index) {
            Some(Child::Node(node)) => Some(node),
            _ => None,
        }
    }

    /// The child at `index` if it is a name or string
    pub fn text(&self, index: usize) -> Option<&str> {
        match self.children.get(index) {
            Some(Child::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Iterate over the node children from `start`, skipping everything else
    pub fn nodes_from(&self, start: usize) -> impl Iterator<Item = &Node> {
        self.children.iter().skip(start).filter_map(|c| match c {
            Child::Node(node) => Some(&**node),
            _ => None,
        })
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    pub fn span(&self, file: &Rc<str>) -> Span {
        let file = if self.file.is_empty() {
            Rc::clone(file)
        } else {
            Rc::from(self.file.as_str())
        };
        Span { file, line: self.line }
    }
}

impl From<Node> for Child {
    fn from(node: Node) -> Self {
        Child::Node(Box::new(node))
    }
}

impl From<&str> for Child {
    fn from(text: &str) -> Self {
        Child::Text(text.to_string())
    }
}

impl From<i64> for Child {
    fn from(value: i64) -> Self {
        Child::Int(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deserialize_json_tree() {
        let json = r#"{
            "kind": "lasgn", "line": 3, "file": "main.rb",
            "children": ["a", {"kind": "lit", "children": [42]}, null]
        }"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.kind, "lasgn");
        assert_eq!(node.text(0), Some("a"));
        assert_eq!(node.node(1).unwrap().child(0), Some(&Child::Int(42)));
        assert_eq!(node.child(2), Some(&Child::Nil));
        assert_eq!(node.line, 3);
    }

    #[test]
    fn test_span_inherits_file() {
        let file: Rc<str> = Rc::from("outer.rb");
        let node = Node::new("nil", vec![], 7);
        assert_eq!(node.span(&file).to_string(), "outer.rb:7");
    }
}

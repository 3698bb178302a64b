//! S-expression reader for syntax trees
//!
//! ```text
//! (block
//!   (lasgn a (lit 1))
//!   (call (lvar a) + (lit 2)))
//! ```
//!
//! Bare atoms become text children, `"..."` is a string with the usual
//! escapes, numbers become `Int`/`Float`, and `_` is the absent marker.
//! Each node takes the line of its opening parenthesis. `;` starts a comment.
//! Several top-level forms are wrapped in an implicit `block`.

use super::{Child, Node};
use crate::error::CompileError;
use crate::span::Span;
use std::iter::Peekable;
use std::rc::Rc;
use std::str::CharIndices;

/// Parse `source` into a single tree
pub fn parse(source: &str, file: &str) -> Result<Node, CompileError> {
    let mut reader = Reader {
        chars: source.char_indices().peekable(),
        line: 1,
        file: Rc::from(file),
    };
    let mut forms = Vec::new();
    loop {
        reader.skip_trivia();
        match reader.chars.peek() {
            None => break,
            Some((_, '(')) => forms.push(reader.read_node()?),
            Some(&(_, c)) => {
                return Err(reader.error(format!("expected '(' at top level, found '{}'", c)))
            }
        }
    }
    let mut root = match forms.len() {
        0 => Node::new("nil", Vec::new(), 1),
        1 => forms.remove(0),
        _ => Node::new("block", forms.into_iter().map(Child::from).collect(), 1),
    };
    root.file = file.to_string();
    Ok(root)
}

struct Reader<'a> {
    chars: Peekable<CharIndices<'a>>,
    line: u32,
    file: Rc<str>,
}

impl Reader<'_> {
    fn error(&self, message: String) -> CompileError {
        CompileError::new(message, Span::new(Rc::clone(&self.file), self.line))
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == ';' {
                while let Some(&(_, c)) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn read_node(&mut self) -> Result<Node, CompileError> {
        let line = self.line;
        self.bump(); // (
        self.skip_trivia();
        let kind = match self.read_child()? {
            Some(Child::Text(kind)) => kind,
            _ => return Err(self.error("node must start with a kind".to_string())),
        };
        let mut children = Vec::new();
        loop {
            self.skip_trivia();
            match self.chars.peek() {
                None => return Err(self.error(format!("unterminated ({}", kind))),
                Some((_, ')')) => {
                    self.bump();
                    break;
                }
                Some(_) => match self.read_child()? {
                    Some(child) => children.push(child),
                    None => return Err(self.error("unexpected token".to_string())),
                },
            }
        }
        Ok(Node::new(kind, children, line))
    }

    fn read_child(&mut self) -> Result<Option<Child>, CompileError> {
        match self.chars.peek() {
            Some((_, '(')) => Ok(Some(Child::from(self.read_node()?))),
            Some((_, '"')) => self.read_string().map(|s| Some(Child::Text(s))),
            Some((_, ')')) | None => Ok(None),
            Some(_) => {
                let mut atom = String::new();
                while let Some(&(_, c)) = self.chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == ';' {
                        break;
                    }
                    atom.push(c);
                    self.bump();
                }
                Ok(Some(classify_atom(atom)))
            }
        }
    }

    fn read_string(&mut self) -> Result<String, CompileError> {
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string".to_string())),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('0') => out.push('\0'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string".to_string())),
                },
                Some(c) => out.push(c),
            }
        }
    }
}

fn classify_atom(atom: String) -> Child {
    if atom == "_" {
        return Child::Nil;
    }
    let numeric_start = atom
        .strip_prefix('-')
        .unwrap_or(&atom)
        .starts_with(|c: char| c.is_ascii_digit());
    if numeric_start {
        let digits: String = atom.chars().filter(|&c| c != '_').collect();
        if let Ok(value) = digits.parse::<i64>() {
            return Child::Int(value);
        }
        if let Ok(value) = digits.parse::<f64>() {
            return Child::Float(value);
        }
    }
    Child::Text(atom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_nested_forms_with_lines() {
        let tree = parse("(block\n  (lasgn a (lit 1))\n  (lvar a))", "t.rb").unwrap();
        assert_eq!(tree.kind, "block");
        assert_eq!(tree.file, "t.rb");
        let assign = tree.node(0).unwrap();
        assert_eq!(assign.line, 2);
        assert_eq!(assign.text(0), Some("a"));
        assert_eq!(assign.node(1).unwrap().child(0), Some(&Child::Int(1)));
        assert_eq!(tree.node(1).unwrap().line, 3);
    }

    #[test]
    fn test_atoms() {
        let tree = parse(r#"(x -3 2.5 _ "a\"b" + 1_000)"#, "t").unwrap();
        assert_eq!(
            tree.children,
            vec![
                Child::Int(-3),
                Child::Float(2.5),
                Child::Nil,
                Child::Text("a\"b".to_string()),
                Child::Text("+".to_string()),
                Child::Int(1000),
            ]
        );
    }

    #[test]
    fn test_multiple_forms_are_wrapped() {
        let tree = parse("(lit 1) ; one\n(lit 2)", "t").unwrap();
        assert_eq!(tree.kind, "block");
        assert_eq!(tree.children.len(), 2);
    }

    #[test]
    fn test_unterminated_form_reports_line() {
        let err = parse("(block\n(lit 1)", "t.rb").unwrap_err();
        assert_eq!(err.span.line, 2);
        assert!(err.message.contains("unterminated"));
    }
}

//! Source positions attached to AST nodes and instructions

use std::fmt;
use std::rc::Rc;

/// A file/line pair. Columns are not tracked; the external parser only
/// reports lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Span {
    pub file: Rc<str>,
    pub line: u32,
}

impl Span {
    pub fn new(file: impl Into<Rc<str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Placeholder for synthesized code
    pub fn dummy() -> Self {
        Self::new("-", 0)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

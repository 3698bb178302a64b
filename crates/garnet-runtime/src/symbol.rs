//! Interned-by-value identifiers
//!
//! Method names, variable names and guest `Symbol` values all use this type.
//! Cloning is a reference-count bump.

use std::borrow::Borrow;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol(Rc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `foo=` style names
    pub fn is_setter(&self) -> bool {
        self.0.len() > 1 && self.0.ends_with('=') && !matches!(&*self.0, "==" | "!=" | "===")
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

impl From<String> for Symbol {
    fn from(name: String) -> Self {
        Symbol(Rc::from(name))
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_lookup_by_str() {
        let mut table = HashMap::new();
        table.insert(Symbol::new("each"), 1);
        assert_eq!(table.get("each"), Some(&1));
    }

    #[test]
    fn test_setter_names() {
        assert!(Symbol::new("name=").is_setter());
        assert!(!Symbol::new("==").is_setter());
        assert!(!Symbol::new("=").is_setter());
    }
}

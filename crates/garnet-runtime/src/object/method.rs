//! Method table entries

use super::ClassId;
use crate::bytecode::CodeObject;
use crate::symbol::Symbol;
use crate::value::{Proc, Value};
use crate::vm::env::LexicalScope;
use crate::vm::{Vm, VmResult};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

/// Builtin method signature: vm, receiver, arguments, block
pub type NativeFn = fn(&mut Vm, &Value, &[Value], Option<&Rc<Proc>>) -> VmResult<Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    /// `None` for variadic
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exactly(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    pub const fn range(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    pub const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }

    pub fn describe(&self) -> String {
        match self.max {
            Some(max) if max == self.min => max.to_string(),
            Some(max) => format!("{}..{}", self.min, max),
            None => format!("{}+", self.min),
        }
    }
}

pub enum MethodDef {
    Native { func: NativeFn, arity: Arity },
    /// Compiled `def`; `lexical` is the constant scope at the definition site
    Iseq {
        code: Rc<CodeObject>,
        lexical: Rc<LexicalScope>,
    },
    /// `define_method` with a block
    Proc(Rc<Proc>),
    AttrReader(Symbol),
    AttrWriter(Symbol),
    /// The original entry as it was when the alias was made
    Alias(Rc<MethodEntry>),
    /// `undef`: stops lookup
    Undefined,
}

pub struct MethodEntry {
    pub name: Symbol,
    pub owner: ClassId,
    pub visibility: Visibility,
    pub def: MethodDef,
}

impl MethodEntry {
    pub fn is_undefined(&self) -> bool {
        matches!(self.def, MethodDef::Undefined)
    }

    /// Follow alias links to the definition that actually runs
    pub fn resolved(self: &Rc<Self>) -> Rc<MethodEntry> {
        let mut entry = Rc::clone(self);
        while let MethodDef::Alias(target) = &entry.def {
            let next = Rc::clone(target);
            entry = next;
        }
        entry
    }

    /// Copy with another visibility; the owner is kept so `super` still
    /// starts above the original definition
    pub fn with_visibility(&self, visibility: Visibility) -> MethodEntry {
        let def = match &self.def {
            MethodDef::Native { func, arity } => MethodDef::Native {
                func: *func,
                arity: *arity,
            },
            MethodDef::Iseq { code, lexical } => MethodDef::Iseq {
                code: Rc::clone(code),
                lexical: Rc::clone(lexical),
            },
            MethodDef::Proc(p) => MethodDef::Proc(Rc::clone(p)),
            MethodDef::AttrReader(n) => MethodDef::AttrReader(n.clone()),
            MethodDef::AttrWriter(n) => MethodDef::AttrWriter(n.clone()),
            MethodDef::Alias(t) => MethodDef::Alias(Rc::clone(t)),
            MethodDef::Undefined => MethodDef::Undefined,
        };
        MethodEntry {
            name: self.name.clone(),
            owner: self.owner,
            visibility,
            def,
        }
    }

    pub fn arity(&self) -> i64 {
        match &self.def {
            MethodDef::Native { arity, .. } => match arity.max {
                Some(max) if max == arity.min => max as i64,
                _ => -(arity.min as i64) - 1,
            },
            MethodDef::Iseq { code, .. } => code.params.arity(),
            MethodDef::Proc(p) => p.arity(),
            MethodDef::AttrReader(_) => 0,
            MethodDef::AttrWriter(_) => 1,
            MethodDef::Alias(target) => target.arity(),
            MethodDef::Undefined => 0,
        }
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.def {
            MethodDef::Native { .. } => "native",
            MethodDef::Iseq { .. } => "iseq",
            MethodDef::Proc(_) => "proc",
            MethodDef::AttrReader(_) => "attr_reader",
            MethodDef::AttrWriter(_) => "attr_writer",
            MethodDef::Alias(_) => "alias",
            MethodDef::Undefined => "undefined",
        };
        write!(f, "{}#{} ({}, {:?})", self.owner, self.name, kind, self.visibility)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_bounds() {
        assert!(Arity::range(1, 2).accepts(2));
        assert!(!Arity::range(1, 2).accepts(3));
        assert!(Arity::at_least(1).accepts(10));
        assert_eq!(Arity::at_least(1).describe(), "1+");
        assert_eq!(Arity::exactly(0).describe(), "0");
    }
}

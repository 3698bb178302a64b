//! Runtime values
//!
//! Immediates are stored inline; strings, arrays, hashes, objects and procs
//! are shared through `Rc` and mutated through `RefCell`. The runtime is
//! single-threaded, so none of these types are `Send`.

use crate::bytecode::CodeObject;
use crate::object::ClassId;
use crate::symbol::Symbol;
use crate::vm::env::Env;
use crate::vm::signal::Signal;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub enum Value {
    Nil,
    True,
    False,
    Integer(i64),
    Float(f64),
    Symbol(Symbol),
    String(Rc<RefCell<String>>),
    Array(Rc<RefCell<Vec<Value>>>),
    Hash(Rc<RefCell<HashTable>>),
    Range(Rc<RangeData>),
    Object(Rc<RObject>),
    /// A class or module handle
    Class(ClassId),
    Proc(Rc<Proc>),
    /// A reified unwind held by an ensure handler; never visible to guest code
    Signal(Rc<Signal>),
}

impl Value {
    pub fn bool(b: bool) -> Value {
        if b {
            Value::True
        } else {
            Value::False
        }
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Rc::new(RefCell::new(s.into())))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Symbol::new(name))
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::False)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_class(&self) -> Option<ClassId> {
        match self {
            Value::Class(id) => Some(*id),
            _ => None,
        }
    }

    /// Reference identity (`equal?`). Immediates compare by value.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b),
            (Value::Range(a), Value::Range(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Proc(a), Value::Proc(b)) => Rc::ptr_eq(a, b),
            (Value::Signal(a), Value::Signal(b)) => Rc::ptr_eq(a, b),
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    /// Stable identity used by `object_id` and identity hashing
    pub fn identity(&self) -> u64 {
        match self {
            Value::Nil => 8,
            Value::True => 20,
            Value::False => 0,
            Value::Integer(i) => (*i as u64).wrapping_mul(2).wrapping_add(1),
            Value::Float(f) => f.to_bits(),
            Value::Symbol(s) => s
                .as_str()
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325, |h, b| {
                    (h ^ u64::from(b)).wrapping_mul(0x100_0000_01b3)
                }),
            Value::String(s) => Rc::as_ptr(s) as *const u8 as u64,
            Value::Array(a) => Rc::as_ptr(a) as *const u8 as u64,
            Value::Hash(h) => Rc::as_ptr(h) as *const u8 as u64,
            Value::Range(r) => Rc::as_ptr(r) as *const u8 as u64,
            Value::Object(o) => Rc::as_ptr(o) as *const u8 as u64,
            Value::Class(id) => 0x1000 + u64::from(id.0) * 8,
            Value::Proc(p) => Rc::as_ptr(p) as *const u8 as u64,
            Value::Signal(s) => Rc::as_ptr(s) as *const u8 as u64,
        }
    }
}

/// Structural equality for host-side comparisons and tests. Guest `==`
/// goes through method dispatch instead.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::True, Value::True) | (Value::False, Value::False) => {
                true
            }
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::String(a), Value::String(b)) => *a.borrow() == *b.borrow(),
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Hash(a), Value::Hash(b)) => {
                Rc::ptr_eq(a, b) || a.borrow().entries() == b.borrow().entries()
            }
            (Value::Range(a), Value::Range(b)) => {
                a.exclusive == b.exclusive && a.start == b.start && a.end == b.end
            }
            (Value::Class(a), Value::Class(b)) => a == b,
            _ => self.identical_ref(other),
        }
    }
}

impl Value {
    fn identical_ref(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Proc(a), Value::Proc(b)) => Rc::ptr_eq(a, b),
            (Value::Signal(a), Value::Signal(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::True => write!(f, "true"),
            Value::False => write!(f, "false"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Symbol(s) => write!(f, "{:?}", s),
            Value::String(s) => write!(f, "{:?}", s.borrow()),
            Value::Array(a) => f.debug_list().entries(a.borrow().iter()).finish(),
            Value::Hash(h) => f
                .debug_map()
                .entries(h.borrow().entries().iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Range(r) => {
                let dots = if r.exclusive { "..." } else { ".." };
                write!(f, "{:?}{}{:?}", r.start, dots, r.end)
            }
            Value::Object(o) => write!(f, "#<object {:?}>", o.class.get()),
            Value::Class(id) => write!(f, "#<class {:?}>", id),
            Value::Proc(p) => write!(f, "#<Proc{}>", if p.lambda { " (lambda)" } else { "" }),
            Value::Signal(s) => write!(f, "#<signal {:?}>", s.reason),
        }
    }
}

/// A plain guest object: its class and instance variables
#[derive(Debug)]
pub struct RObject {
    /// Switches to the singleton class once one is created
    pub class: Cell<ClassId>,
    pub ivars: RefCell<HashMap<Symbol, Value>>,
}

impl RObject {
    pub fn new(class: ClassId) -> Rc<RObject> {
        Rc::new(RObject {
            class: Cell::new(class),
            ivars: RefCell::new(HashMap::new()),
        })
    }

    pub fn ivar(&self, name: &str) -> Value {
        self.ivars.borrow().get(name).cloned().unwrap_or(Value::Nil)
    }

    pub fn set_ivar(&self, name: Symbol, value: Value) {
        self.ivars.borrow_mut().insert(name, value);
    }
}

#[derive(Debug)]
pub struct RangeData {
    pub start: Value,
    pub end: Value,
    pub exclusive: bool,
}

impl RangeData {
    /// Integer bounds as an inclusive `(low, high)` pair
    pub fn int_bounds(&self) -> Option<(i64, i64)> {
        match (&self.start, &self.end) {
            (Value::Integer(lo), Value::Integer(hi)) => {
                let hi = if self.exclusive { hi - 1 } else { *hi };
                Some((*lo, hi))
            }
            _ => None,
        }
    }
}

/// Insertion-ordered hash table. Key hashing and `eql?` are computed by the
/// VM (they may call guest methods), so the table only stores the hash next
/// to each entry and leaves the equality decision to the caller. `index`
/// maps each hash to the positions of its entries.
#[derive(Debug, Default)]
pub struct HashTable {
    entries: Vec<(u64, Value, Value)>,
    index: HashMap<u64, Vec<usize>>,
}

impl HashTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys of entries whose stored hash is `hash`
    pub fn candidates(&self, hash: u64) -> Vec<Value> {
        self.index
            .get(&hash)
            .map(|positions| {
                positions
                    .iter()
                    .filter_map(|&i| self.entries.get(i).map(|(_, k, _)| k.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current position of the entry holding exactly `key`
    pub fn position_of(&self, hash: u64, key: &Value) -> Option<usize> {
        self.index.get(&hash)?.iter().copied().find(|&i| {
            matches!(self.entries.get(i), Some((_, k, _)) if k.identical(key))
        })
    }

    pub fn value_at(&self, index: usize) -> Option<Value> {
        self.entries.get(index).map(|(_, _, v)| v.clone())
    }

    pub fn set_at(&mut self, index: usize, value: Value) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.2 = value;
        }
    }

    pub fn push(&mut self, hash: u64, key: Value, value: Value) {
        self.index.entry(hash).or_default().push(self.entries.len());
        self.entries.push((hash, key, value));
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Value> {
        if index >= self.entries.len() {
            return None;
        }
        let (hash, _, value) = self.entries.remove(index);
        if let Some(positions) = self.index.get_mut(&hash) {
            positions.retain(|&i| i != index);
            if positions.is_empty() {
                self.index.remove(&hash);
            }
        }
        for positions in self.index.values_mut() {
            for position in positions.iter_mut().filter(|p| **p > index) {
                *position -= 1;
            }
        }
        Some(value)
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.entries
            .iter()
            .map(|(_, k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, _, v)| v.clone()).collect()
    }

    /// Keyword-argument hashes have only symbol keys
    pub fn all_symbol_keys(&self) -> bool {
        self.entries
            .iter()
            .all(|(_, k, _)| matches!(k, Value::Symbol(_)))
    }

    /// Symbol keys never need guest `eql?`, so lookup is local
    pub fn take_symbol(&mut self, name: &Symbol) -> Option<Value> {
        let index = self
            .entries
            .iter()
            .position(|(_, k, _)| matches!(k, Value::Symbol(s) if s == name))?;
        self.remove_at(index)
    }
}

/// A closure: code plus the environment and receiver it was created in
pub struct Proc {
    pub body: ProcBody,
    /// Lambdas check arity strictly, never auto-splat, and `return`/`break`
    /// exit only themselves
    pub lambda: bool,
}

pub enum ProcBody {
    Block {
        code: Rc<CodeObject>,
        env: Rc<Env>,
        self_value: Value,
    },
    /// `&:name`
    Symbol(Symbol),
}

impl Proc {
    pub fn block(code: Rc<CodeObject>, env: Rc<Env>, self_value: Value) -> Rc<Proc> {
        Rc::new(Proc {
            body: ProcBody::Block {
                code,
                env,
                self_value,
            },
            lambda: false,
        })
    }

    /// Same closure, lambda semantics
    pub fn to_lambda(&self) -> Rc<Proc> {
        let body = match &self.body {
            ProcBody::Block {
                code,
                env,
                self_value,
            } => ProcBody::Block {
                code: Rc::clone(code),
                env: Rc::clone(env),
                self_value: self_value.clone(),
            },
            ProcBody::Symbol(name) => ProcBody::Symbol(name.clone()),
        };
        Rc::new(Proc { body, lambda: true })
    }

    pub fn arity(&self) -> i64 {
        match &self.body {
            ProcBody::Block { code, .. } => code.params.arity(),
            ProcBody::Symbol(_) => -2,
        }
    }
}

impl fmt::Debug for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            ProcBody::Block { code, .. } => f
                .debug_struct("Proc")
                .field("code", &code.name)
                .field("lambda", &self.lambda)
                .finish(),
            ProcBody::Symbol(name) => write!(f, "Proc(&{:?})", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::False.is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn test_structural_eq_vs_identity() {
        let a = Value::string("x");
        let b = Value::string("x");
        assert_eq!(a, b);
        assert!(!a.identical(&b));
        assert!(a.identical(&a.clone()));
    }

    #[test]
    fn test_hash_table_symbol_keys() {
        let mut table = HashTable::new();
        table.push(1, Value::symbol("a"), Value::Integer(1));
        table.push(2, Value::symbol("b"), Value::Integer(2));
        assert!(table.all_symbol_keys());
        assert_eq!(table.take_symbol(&Symbol::new("a")), Some(Value::Integer(1)));
        assert_eq!(table.keys(), vec![Value::symbol("b")]);
    }

    #[test]
    fn test_exclusive_range_bounds() {
        let range = RangeData {
            start: Value::Integer(1),
            end: Value::Integer(5),
            exclusive: true,
        };
        assert_eq!(range.int_bounds(), Some((1, 4)));
    }

    #[test]
    fn test_hash_table_index_follows_removals() {
        let mut table = HashTable::new();
        table.push(1, Value::Integer(10), Value::symbol("a"));
        table.push(2, Value::Integer(20), Value::symbol("b"));
        table.push(1, Value::Integer(30), Value::symbol("c"));
        assert_eq!(table.candidates(1), vec![Value::Integer(10), Value::Integer(30)]);

        assert_eq!(table.remove_at(0), Some(Value::symbol("a")));
        assert_eq!(table.candidates(1), vec![Value::Integer(30)]);
        assert_eq!(table.position_of(1, &Value::Integer(30)), Some(1));
        assert_eq!(table.position_of(2, &Value::Integer(20)), Some(0));
        assert_eq!(table.value_at(1), Some(Value::symbol("c")));

        table.remove_at(0);
        assert!(table.candidates(2).is_empty());
        assert_eq!(table.keys(), vec![Value::Integer(30)]);
    }
}

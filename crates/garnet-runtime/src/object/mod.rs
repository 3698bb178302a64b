//! Class/module graph
//!
//! Classes live in an arena addressed by [`ClassId`]. Including a module
//! inserts a synthetic segment into the superclass chain right above the
//! including class, so method resolution is a single walk of the chain.
//! Every class caches its ancestor list; any hierarchy mutation recomputes
//! the list for the changed class and all of its descendants. Method tables
//! are never cached: a redefinition is visible on the next call.

pub mod method;

pub use method::{Arity, MethodDef, MethodEntry, NativeFn, Visibility};

use crate::symbol::Symbol;
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    pub const BASIC_OBJECT: ClassId = ClassId(0);
    pub const OBJECT: ClassId = ClassId(1);
    pub const MODULE: ClassId = ClassId(2);
    pub const CLASS: ClassId = ClassId(3);
    pub const KERNEL: ClassId = ClassId(4);
    pub const NIL_CLASS: ClassId = ClassId(5);
    pub const TRUE_CLASS: ClassId = ClassId(6);
    pub const FALSE_CLASS: ClassId = ClassId(7);
    pub const NUMERIC: ClassId = ClassId(8);
    pub const INTEGER: ClassId = ClassId(9);
    pub const FLOAT: ClassId = ClassId(10);
    pub const STRING: ClassId = ClassId(11);
    pub const SYMBOL: ClassId = ClassId(12);
    pub const ARRAY: ClassId = ClassId(13);
    pub const HASH: ClassId = ClassId(14);
    pub const RANGE: ClassId = ClassId(15);
    pub const PROC: ClassId = ClassId(16);
    pub const EXCEPTION: ClassId = ClassId(17);
    pub const STANDARD_ERROR: ClassId = ClassId(18);
    pub const RUNTIME_ERROR: ClassId = ClassId(19);
    pub const ARGUMENT_ERROR: ClassId = ClassId(20);
    pub const NAME_ERROR: ClassId = ClassId(21);
    pub const NO_METHOD_ERROR: ClassId = ClassId(22);
    pub const TYPE_ERROR: ClassId = ClassId(23);
    pub const ZERO_DIVISION_ERROR: ClassId = ClassId(24);
    pub const INDEX_ERROR: ClassId = ClassId(25);
    pub const KEY_ERROR: ClassId = ClassId(26);
    pub const RANGE_ERROR: ClassId = ClassId(27);
    pub const LOCAL_JUMP_ERROR: ClassId = ClassId(28);
    pub const STOP_ITERATION: ClassId = ClassId(29);
    pub const SYSTEM_STACK_ERROR: ClassId = ClassId(30);

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// (id, name, superclass) for every bootstrap class, in id order
const BOOTSTRAP: &[(ClassId, &str, Option<ClassId>)] = &[
    (ClassId::BASIC_OBJECT, "BasicObject", None),
    (ClassId::OBJECT, "Object", Some(ClassId::BASIC_OBJECT)),
    (ClassId::MODULE, "Module", Some(ClassId::OBJECT)),
    (ClassId::CLASS, "Class", Some(ClassId::MODULE)),
    (ClassId::KERNEL, "Kernel", None),
    (ClassId::NIL_CLASS, "NilClass", Some(ClassId::OBJECT)),
    (ClassId::TRUE_CLASS, "TrueClass", Some(ClassId::OBJECT)),
    (ClassId::FALSE_CLASS, "FalseClass", Some(ClassId::OBJECT)),
    (ClassId::NUMERIC, "Numeric", Some(ClassId::OBJECT)),
    (ClassId::INTEGER, "Integer", Some(ClassId::NUMERIC)),
    (ClassId::FLOAT, "Float", Some(ClassId::NUMERIC)),
    (ClassId::STRING, "String", Some(ClassId::OBJECT)),
    (ClassId::SYMBOL, "Symbol", Some(ClassId::OBJECT)),
    (ClassId::ARRAY, "Array", Some(ClassId::OBJECT)),
    (ClassId::HASH, "Hash", Some(ClassId::OBJECT)),
    (ClassId::RANGE, "Range", Some(ClassId::OBJECT)),
    (ClassId::PROC, "Proc", Some(ClassId::OBJECT)),
    (ClassId::EXCEPTION, "Exception", Some(ClassId::OBJECT)),
    (ClassId::STANDARD_ERROR, "StandardError", Some(ClassId::EXCEPTION)),
    (ClassId::RUNTIME_ERROR, "RuntimeError", Some(ClassId::STANDARD_ERROR)),
    (ClassId::ARGUMENT_ERROR, "ArgumentError", Some(ClassId::STANDARD_ERROR)),
    (ClassId::NAME_ERROR, "NameError", Some(ClassId::STANDARD_ERROR)),
    (ClassId::NO_METHOD_ERROR, "NoMethodError", Some(ClassId::NAME_ERROR)),
    (ClassId::TYPE_ERROR, "TypeError", Some(ClassId::STANDARD_ERROR)),
    (ClassId::ZERO_DIVISION_ERROR, "ZeroDivisionError", Some(ClassId::STANDARD_ERROR)),
    (ClassId::INDEX_ERROR, "IndexError", Some(ClassId::STANDARD_ERROR)),
    (ClassId::KEY_ERROR, "KeyError", Some(ClassId::INDEX_ERROR)),
    (ClassId::RANGE_ERROR, "RangeError", Some(ClassId::STANDARD_ERROR)),
    (ClassId::LOCAL_JUMP_ERROR, "LocalJumpError", Some(ClassId::STANDARD_ERROR)),
    (ClassId::STOP_ITERATION, "StopIteration", Some(ClassId::INDEX_ERROR)),
    (ClassId::SYSTEM_STACK_ERROR, "SystemStackError", Some(ClassId::EXCEPTION)),
];

#[derive(Debug, Clone, PartialEq)]
pub enum ClassKind {
    Class,
    Module,
    /// Singleton class of `attached` (an object, or a class for metaclasses)
    Singleton { attached: Value },
    /// Chain segment standing in for an included module
    IncludedModule { module: ClassId },
}

#[derive(Debug)]
pub struct ClassData {
    pub name: Option<Symbol>,
    pub kind: ClassKind,
    pub superclass: Option<ClassId>,
    pub methods: HashMap<Symbol, Rc<MethodEntry>>,
    pub constants: HashMap<Symbol, Value>,
    pub class_vars: HashMap<Symbol, Value>,
    pub ivars: HashMap<Symbol, Value>,
    pub metaclass: Option<ClassId>,
    /// Direct children in the superclass chain (subclasses and segments)
    pub subclasses: HashSet<ClassId>,
    /// Self first, then the superclass chain including segments
    pub ancestors: Vec<ClassId>,
}

impl ClassData {
    fn new(name: Option<Symbol>, kind: ClassKind, superclass: Option<ClassId>) -> Self {
        Self {
            name,
            kind,
            superclass,
            methods: HashMap::new(),
            constants: HashMap::new(),
            class_vars: HashMap::new(),
            ivars: HashMap::new(),
            metaclass: None,
            subclasses: HashSet::new(),
            ancestors: Vec::new(),
        }
    }

    pub fn is_module(&self) -> bool {
        matches!(self.kind, ClassKind::Module)
    }

    pub fn is_singleton(&self) -> bool {
        matches!(self.kind, ClassKind::Singleton { .. })
    }
}

/// Arena of every class, module, metaclass and include segment
#[derive(Debug)]
pub struct ClassTable {
    classes: Vec<ClassData>,
}

impl ClassTable {
    /// Build the bootstrap hierarchy: `BasicObject`, `Object` (with `Kernel`
    /// mixed in), `Module`, `Class`, the value classes and the exception tree
    pub fn new() -> Self {
        let mut table = ClassTable {
            classes: Vec::new(),
        };
        for (id, name, superclass) in BOOTSTRAP {
            let kind = if *id == ClassId::KERNEL {
                ClassKind::Module
            } else {
                ClassKind::Class
            };
            let allocated = table.alloc(ClassData::new(Some(Symbol::new(name)), kind, *superclass));
            debug_assert_eq!(allocated, *id);
            if let Some(sup) = superclass {
                table.get_mut(*sup).subclasses.insert(*id);
            }
        }
        table.refresh_ancestors(ClassId::BASIC_OBJECT);
        table.refresh_ancestors(ClassId::KERNEL);
        table.include_module(ClassId::OBJECT, ClassId::KERNEL);
        for (id, name, _) in BOOTSTRAP {
            table
                .get_mut(ClassId::OBJECT)
                .constants
                .insert(Symbol::new(name), Value::Class(*id));
        }
        table
    }

    fn alloc(&mut self, data: ClassData) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(data);
        id
    }

    pub fn get(&self, id: ClassId) -> &ClassData {
        &self.classes[id.index()]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut ClassData {
        &mut self.classes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Create a class under `superclass`
    pub fn define_class(&mut self, name: Option<Symbol>, superclass: ClassId) -> ClassId {
        let id = self.alloc(ClassData::new(name, ClassKind::Class, Some(superclass)));
        self.get_mut(superclass).subclasses.insert(id);
        self.refresh_ancestors(id);
        id
    }

    pub fn define_module(&mut self, name: Option<Symbol>) -> ClassId {
        let id = self.alloc(ClassData::new(name, ClassKind::Module, None));
        self.refresh_ancestors(id);
        id
    }

    /// Table whose method/constant entries a chain element stands for
    pub fn origin(&self, id: ClassId) -> ClassId {
        match self.get(id).kind {
            ClassKind::IncludedModule { module } => module,
            _ => id,
        }
    }

    /// Ancestors as the guest sees them (segments replaced by their modules)
    pub fn ancestor_modules(&self, id: ClassId) -> Vec<ClassId> {
        self.get(id)
            .ancestors
            .iter()
            .map(|a| self.origin(*a))
            .collect()
    }

    /// Nearest ancestor that is a real class (not a singleton or segment)
    pub fn real_class(&self, id: ClassId) -> ClassId {
        let mut current = id;
        loop {
            let data = self.get(current);
            match data.kind {
                ClassKind::Class | ClassKind::Module => return current,
                _ => match data.superclass {
                    Some(sup) => current = sup,
                    None => return current,
                },
            }
        }
    }

    /// Guest-visible superclass: skips segments
    pub fn superclass_of(&self, id: ClassId) -> Option<ClassId> {
        let mut current = self.get(id).superclass?;
        loop {
            match self.get(current).kind {
                ClassKind::IncludedModule { .. } => current = self.get(current).superclass?,
                _ => return Some(current),
            }
        }
    }

    /// Whether `class` has `ancestor` (a class or module) in its chain
    pub fn inherits(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.get(class)
            .ancestors
            .iter()
            .any(|a| *a == ancestor || self.origin(*a) == ancestor)
    }

    /// Mix `module` (and the modules it includes) into `target`
    pub fn include_module(&mut self, target: ClassId, module: ClassId) {
        let modules = self.ancestor_modules(module);
        for m in modules.into_iter().rev() {
            if self.inherits(target, m) {
                continue;
            }
            let old_super = self.get(target).superclass;
            let segment = self.alloc(ClassData::new(
                None,
                ClassKind::IncludedModule { module: m },
                old_super,
            ));
            if let Some(sup) = old_super {
                let sup_data = self.get_mut(sup);
                sup_data.subclasses.remove(&target);
                sup_data.subclasses.insert(segment);
            }
            self.get_mut(segment).subclasses.insert(target);
            self.get_mut(target).superclass = Some(segment);
            self.refresh_ancestors(segment);
        }
    }

    /// Recompute cached ancestor lists for `id` and everything below it
    pub fn refresh_ancestors(&mut self, id: ClassId) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let mut ancestors = vec![current];
            if let Some(sup) = self.get(current).superclass {
                ancestors.extend_from_slice(&self.get(sup).ancestors);
            }
            let data = self.get_mut(current);
            data.ancestors = ancestors;
            let mut children: Vec<ClassId> = data.subclasses.iter().copied().collect();
            children.sort();
            pending.extend(children);
        }
    }

    /// Metaclass of a class or module, created on first use. Its superclass
    /// is the metaclass of the real superclass, `Class` at the root, or
    /// `Module` for modules.
    pub fn metaclass_of(&mut self, id: ClassId) -> ClassId {
        if let Some(meta) = self.get(id).metaclass {
            return meta;
        }
        let kind = self.get(id).kind.clone();
        let meta_super = match kind {
            ClassKind::Module => ClassId::MODULE,
            ClassKind::Singleton { .. } | ClassKind::IncludedModule { .. } => ClassId::CLASS,
            ClassKind::Class => match self.superclass_of(id) {
                Some(sup) => self.metaclass_of(sup),
                None => ClassId::CLASS,
            },
        };
        let meta = self.alloc(ClassData::new(
            None,
            ClassKind::Singleton {
                attached: Value::Class(id),
            },
            Some(meta_super),
        ));
        self.get_mut(meta_super).subclasses.insert(meta);
        self.get_mut(id).metaclass = Some(meta);
        self.refresh_ancestors(meta);
        meta
    }

    /// Fresh singleton class for an object currently of class `class`
    pub fn new_singleton(&mut self, attached: Value, class: ClassId) -> ClassId {
        let id = self.alloc(ClassData::new(
            None,
            ClassKind::Singleton { attached },
            Some(class),
        ));
        self.get_mut(class).subclasses.insert(id);
        self.refresh_ancestors(id);
        id
    }

    /// Walk the chain of `class`; the first table with an entry wins and an
    /// undefined marker stops the search
    pub fn find_method(&self, class: ClassId, name: &str) -> Option<Rc<MethodEntry>> {
        self.find_method_from(&self.get(class).ancestors, name)
    }

    fn find_method_from(&self, chain: &[ClassId], name: &str) -> Option<Rc<MethodEntry>> {
        for id in chain {
            if let Some(entry) = self.get(self.origin(*id)).methods.get(name) {
                if entry.is_undefined() {
                    return None;
                }
                return Some(Rc::clone(entry));
            }
        }
        None
    }

    /// Lookup for `super` from a method defined in `owner`, with receiver
    /// class `class`: resume one step above `owner` in the receiver's chain
    pub fn find_super_method(
        &self,
        class: ClassId,
        owner: ClassId,
        name: &str,
    ) -> Option<Rc<MethodEntry>> {
        let chain = &self.get(class).ancestors;
        let position = chain.iter().position(|a| self.origin(*a) == owner)?;
        self.find_method_from(&chain[position + 1..], name)
    }

    /// Install or replace a method; returns the entry it replaced in the same table
    pub fn add_method(&mut self, class: ClassId, entry: MethodEntry) -> Option<Rc<MethodEntry>> {
        self.get_mut(class)
            .methods
            .insert(entry.name.clone(), Rc::new(entry))
    }

    /// Display name: `Foo::Bar`, `#<Class:Foo>`, or an anonymous marker
    pub fn name_of(&self, id: ClassId) -> String {
        let data = self.get(id);
        match (&data.kind, &data.name) {
            (ClassKind::IncludedModule { module }, _) => self.name_of(*module),
            (ClassKind::Singleton { attached }, _) => match attached {
                Value::Class(of) => format!("#<Class:{}>", self.name_of(*of)),
                _ => "#<Class:#<Object>>".to_string(),
            },
            (_, Some(name)) => name.to_string(),
            (ClassKind::Module, None) => format!("#<Module:0x{:04x}>", id.0),
            (_, None) => format!("#<Class:0x{:04x}>", id.0),
        }
    }

    /// Constant defined directly in `class` (no inheritance)
    pub fn own_constant(&self, class: ClassId, name: &str) -> Option<Value> {
        self.get(self.origin(class)).constants.get(name).cloned()
    }

    /// Constant found along the ancestors of `class`
    pub fn inherited_constant(&self, class: ClassId, name: &str) -> Option<Value> {
        self.get(class)
            .ancestors
            .iter()
            .find_map(|a| self.own_constant(*a, name))
    }

    /// Set a constant; an anonymous class or module takes the constant's name
    pub fn set_constant(&mut self, class: ClassId, name: Symbol, value: Value) {
        if let Value::Class(id) = value {
            if self.get(id).name.is_none() && !self.get(id).is_singleton() {
                let full = if class == ClassId::OBJECT {
                    name.clone()
                } else {
                    Symbol::from(format!("{}::{}", self.name_of(class), name))
                };
                self.get_mut(id).name = Some(full);
            }
        }
        self.get_mut(class).constants.insert(name, value);
    }

    /// Class holding class variable `name` visible from `class`
    pub fn cvar_owner(&self, class: ClassId, name: &str) -> Option<ClassId> {
        self.get(class)
            .ancestors
            .iter()
            .map(|a| self.origin(*a))
            .find(|a| self.get(*a).class_vars.contains_key(name))
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(name: &str, owner: ClassId) -> MethodEntry {
        MethodEntry {
            name: Symbol::new(name),
            owner,
            visibility: Visibility::Public,
            def: MethodDef::AttrReader(Symbol::new("@x")),
        }
    }

    #[test]
    fn test_bootstrap_chain() {
        let table = ClassTable::new();
        assert_eq!(
            table.ancestor_modules(ClassId::INTEGER),
            vec![
                ClassId::INTEGER,
                ClassId::NUMERIC,
                ClassId::OBJECT,
                ClassId::KERNEL,
                ClassId::BASIC_OBJECT
            ]
        );
        assert_eq!(table.superclass_of(ClassId::OBJECT), Some(ClassId::BASIC_OBJECT));
    }

    #[test]
    fn test_include_inserts_segment_for_existing_subclasses() {
        let mut table = ClassTable::new();
        let base = table.define_class(Some("Base".into()), ClassId::OBJECT);
        let child = table.define_class(Some("Child".into()), base);
        let m = table.define_module(Some("M".into()));
        table.add_method(m, entry("greet", m));

        assert!(table.find_method(child, "greet").is_none());
        table.include_module(base, m);

        assert_eq!(table.find_method(child, "greet").unwrap().owner, m);
        assert_eq!(
            &table.ancestor_modules(child)[..3],
            &[child, base, m]
        );
    }

    #[test]
    fn test_module_methods_added_after_include_are_visible() {
        let mut table = ClassTable::new();
        let m = table.define_module(Some("M".into()));
        let c = table.define_class(Some("C".into()), ClassId::OBJECT);
        table.include_module(c, m);
        table.add_method(m, entry("late", m));
        assert!(table.find_method(c, "late").is_some());
    }

    #[test]
    fn test_undefined_stops_lookup() {
        let mut table = ClassTable::new();
        let base = table.define_class(Some("Base".into()), ClassId::OBJECT);
        let child = table.define_class(Some("Child".into()), base);
        table.add_method(base, entry("x", base));
        table.add_method(
            child,
            MethodEntry {
                def: MethodDef::Undefined,
                ..entry("x", child)
            },
        );
        assert!(table.find_method(child, "x").is_none());
        assert!(table.find_method(base, "x").is_some());
    }

    #[test]
    fn test_super_lookup_starts_above_owner() {
        let mut table = ClassTable::new();
        let base = table.define_class(Some("Base".into()), ClassId::OBJECT);
        let m = table.define_module(Some("M".into()));
        let child = table.define_class(Some("Child".into()), base);
        table.include_module(child, m);
        table.add_method(base, entry("run", base));
        table.add_method(m, entry("run", m));
        table.add_method(child, entry("run", child));

        assert_eq!(table.find_super_method(child, child, "run").unwrap().owner, m);
        assert_eq!(table.find_super_method(child, m, "run").unwrap().owner, base);
        assert!(table.find_super_method(child, base, "run").is_none());
    }

    #[test]
    fn test_metaclass_chain_follows_superclass() {
        let mut table = ClassTable::new();
        let base = table.define_class(Some("Base".into()), ClassId::OBJECT);
        let child = table.define_class(Some("Child".into()), base);
        let child_meta = table.metaclass_of(child);
        let base_meta = table.metaclass_of(base);
        assert_eq!(table.get(child_meta).superclass, Some(base_meta));
        assert!(table.inherits(child_meta, ClassId::CLASS));
        assert_eq!(table.name_of(child_meta), "#<Class:Child>");
    }

    #[test]
    fn test_anonymous_class_named_by_constant() {
        let mut table = ClassTable::new();
        let outer = table.define_module(Some("Outer".into()));
        let anon = table.define_class(None, ClassId::OBJECT);
        table.set_constant(outer, "Inner".into(), Value::Class(anon));
        assert_eq!(table.name_of(anon), "Outer::Inner");
    }
}

//! Environments: the runtime record of one code object's locals
//!
//! Two independent chains hang off every environment. The dynamic chain
//! (`prev`) links a block or handler to the environment it was created in,
//! so a local at depth N is found by walking exactly N links. The lexical
//! chain ([`LexicalScope`]) links class bodies for constant lookup and names
//! the class that `def` defines into.

use crate::bytecode::CodeObject;
use crate::object::{ClassId, Visibility};
use crate::symbol::Symbol;
use crate::value::{Proc, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

#[derive(Debug)]
pub struct LexicalScope {
    pub class: ClassId,
    pub parent: Option<Rc<LexicalScope>>,
}

impl LexicalScope {
    pub fn top() -> Rc<LexicalScope> {
        Rc::new(LexicalScope {
            class: ClassId::OBJECT,
            parent: None,
        })
    }

    pub fn nested(parent: &Rc<LexicalScope>, class: ClassId) -> Rc<LexicalScope> {
        Rc::new(LexicalScope {
            class,
            parent: Some(Rc::clone(parent)),
        })
    }
}

/// The method an environment executes on behalf of, for `super`
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: Symbol,
    pub owner: ClassId,
}

pub struct Env {
    pub locals: RefCell<Vec<Value>>,
    pub prev: Option<Rc<Env>>,
    pub lexical: Rc<LexicalScope>,
    pub code: Rc<CodeObject>,
    /// Block passed to the method invocation that created this environment
    pub block: Option<Rc<Proc>>,
    pub method: Option<MethodInfo>,
    /// Lambda (or method-bodied proc): `return` stops here
    pub lambda: bool,
    /// Default visibility for `def` in this scope
    pub visibility: Cell<Visibility>,
}

impl Env {
    pub fn get(&self, slot: usize) -> Option<Value> {
        self.locals.borrow().get(slot).cloned()
    }

    pub fn set(&self, slot: usize, value: Value) -> bool {
        match self.locals.borrow_mut().get_mut(slot) {
            Some(place) => {
                *place = value;
                true
            }
            None => false,
        }
    }

    /// Environment `depth` dynamic links up
    pub fn up(self: &Rc<Self>, depth: usize) -> Option<Rc<Env>> {
        let mut env = Rc::clone(self);
        for _ in 0..depth {
            env = Rc::clone(env.prev.as_ref()?);
        }
        Some(env)
    }

    /// Outermost environment of the chain: the method, class body or
    /// program that blocks and handlers were created in
    pub fn home(self: &Rc<Self>) -> Rc<Env> {
        let mut env = Rc::clone(self);
        while let Some(prev) = env.prev.clone() {
            env = prev;
        }
        env
    }

    /// Where a `return` issued in this environment lands
    pub fn return_target(self: &Rc<Self>) -> Rc<Env> {
        let mut env = Rc::clone(self);
        loop {
            if env.lambda {
                return env;
            }
            match env.prev.clone() {
                Some(prev) => env = prev,
                None => return env,
            }
        }
    }

    /// Method info for `super`, from the nearest environment that has one
    pub fn method_info(self: &Rc<Self>) -> Option<MethodInfo> {
        let mut env = Some(Rc::clone(self));
        while let Some(current) = env {
            if let Some(info) = &current.method {
                return Some(info.clone());
            }
            env = current.prev.clone();
        }
        None
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("code", &self.code.name)
            .field("locals", &self.locals.borrow().len())
            .field("has_prev", &self.prev.is_some())
            .field("lambda", &self.lambda)
            .finish()
    }
}

//! Call frames

use crate::bytecode::CodeObject;
use crate::value::Value;
use crate::vm::env::Env;
use std::rc::Rc;

/// One activation record
///
/// Every "enter a code object" event pushes a frame: method and block
/// invocation, class bodies, rescue/ensure handlers, and the program itself.
/// A call instruction keeps its own pc while the callee runs; the caller's
/// pc advances when the callee's value is pushed back.
///
/// ```text
/// frames: [<main>] [foo] [block in foo] [rescue in block in foo]
///                                        ^ handler frame, owner is the block
/// ```
#[derive(Debug)]
pub struct CallFrame {
    pub code: Rc<CodeObject>,
    pub pc: usize,
    pub stack: Vec<Value>,
    pub self_value: Value,
    pub env: Rc<Env>,
    /// Set on rescue/ensure handler frames: where the owner resumes when the
    /// handler completes normally
    pub handler_cont: Option<usize>,
    /// Which keyword parameters the caller supplied
    pub kw_passed: Vec<bool>,
}

impl CallFrame {
    pub fn is_handler(&self) -> bool {
        self.handler_cont.is_some()
    }

    /// A frame executing the environment's own code (not a handler on it)
    pub fn owns(&self, env: &Rc<Env>) -> bool {
        !self.is_handler() && Rc::ptr_eq(&self.env, env)
    }
}

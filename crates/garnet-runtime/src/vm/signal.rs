//! Unwind signals
//!
//! Every non-local transfer (raise, break, next, redo, retry, return) is a
//! [`Signal`] carried up the Rust call stack as `Err(Control::Unwind(..))`
//! and resolved against catch tables by the VM.

use crate::bytecode::CodeObject;
use crate::error::InternalError;
use crate::value::Value;
use crate::vm::env::Env;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindReason {
    Raise,
    Break,
    Next,
    Redo,
    Retry,
    Return,
}

impl fmt::Display for UnwindReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnwindReason::Raise => "raise",
            UnwindReason::Break => "break",
            UnwindReason::Next => "next",
            UnwindReason::Redo => "redo",
            UnwindReason::Retry => "retry",
            UnwindReason::Return => "return",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
pub struct Signal {
    pub reason: UnwindReason,
    /// Exception for raise; carried value for break/next/return
    pub value: Value,
    /// Environment whose frame resolves the signal (none for raise)
    pub target: Option<Rc<Env>>,
    /// Catch-entry tag: the block code for a block break, the rescue handler
    /// for retry, the block code for block-scoped next/redo
    pub tag: Option<Rc<CodeObject>>,
}

impl Signal {
    pub fn raise(exception: Value) -> Signal {
        Signal {
            reason: UnwindReason::Raise,
            value: exception,
            target: None,
            tag: None,
        }
    }

    pub fn targets(&self, env: &Rc<Env>) -> bool {
        self.target.as_ref().map_or(false, |t| Rc::ptr_eq(t, env))
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("reason", &self.reason)
            .field("value", &self.value)
            .field("tag", &self.tag.as_ref().map(|c| c.name.clone()))
            .finish()
    }
}

/// Error half of every VM operation
#[derive(Debug)]
pub enum Control {
    Unwind(Box<Signal>),
    Internal(InternalError),
}

impl From<InternalError> for Control {
    fn from(err: InternalError) -> Self {
        Control::Internal(err)
    }
}

impl From<Signal> for Control {
    fn from(signal: Signal) -> Self {
        Control::Unwind(Box::new(signal))
    }
}

pub type VmResult<T> = Result<T, Control>;

//! Raising signals and resolving them against catch tables
//!
//! A `Throw` turns into a [`Signal`] aimed at an environment. The unwinder
//! walks frames top-down: the first catch entry that covers the frame's pc
//! and accepts the signal wins; otherwise a frame that owns the target
//! completes the transfer itself, and any other frame is discarded.

use super::{CallFrame, Control, Env, Signal, UnwindReason, Vm, VmResult};
use crate::bytecode::{CatchEntry, CatchKind, CodeKind, ThrowKind, ThrowScope};
use crate::error::InternalError;
use crate::object::ClassId;
use crate::symbol::Symbol;
use crate::value::{RObject, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::trace;

impl Vm {
    // ===== Throwing =====

    pub(super) fn throw(&mut self, kind: ThrowKind) -> Control {
        match self.build_signal(kind) {
            Ok(signal) => signal.into(),
            Err(control) => control,
        }
    }

    fn build_signal(&mut self, kind: ThrowKind) -> VmResult<Signal> {
        let value = self.pop()?;
        let env = Rc::clone(&self.frame()?.env);
        match kind {
            ThrowKind::Raise => self.raise_value(value),
            ThrowKind::Reraise => match value {
                Value::Signal(signal) => Ok((*signal).clone()),
                other => self.raise_value(other),
            },
            ThrowKind::Break { level, scope } => {
                let env = hop(&env, level)?;
                match scope {
                    ThrowScope::Loop => Ok(aimed(UnwindReason::Break, value, env, false)),
                    ThrowScope::Block if env.lambda => {
                        Ok(aimed(UnwindReason::Return, value, env, false))
                    }
                    ThrowScope::Block => {
                        let creator = env.prev.clone().filter(|creator| self.is_live(creator));
                        match creator {
                            Some(creator) => Ok(Signal {
                                reason: UnwindReason::Break,
                                value,
                                target: Some(creator),
                                tag: Some(Rc::clone(&env.code)),
                            }),
                            None => Err(self.raise_error(
                                ClassId::LOCAL_JUMP_ERROR,
                                "break from proc-closure",
                            )),
                        }
                    }
                }
            }
            ThrowKind::Next { level, scope } => {
                let env = hop(&env, level)?;
                Ok(aimed(UnwindReason::Next, value, env, scope == ThrowScope::Block))
            }
            ThrowKind::Redo { level, scope } => {
                let env = hop(&env, level)?;
                Ok(aimed(UnwindReason::Redo, value, env, scope == ThrowScope::Block))
            }
            ThrowKind::Retry { level } => {
                let handler = hop(&env, level)?;
                let owner = handler.prev.clone().ok_or_else(|| {
                    InternalError::InvalidBytecode("retry outside of a rescue handler".to_string())
                })?;
                Ok(Signal {
                    reason: UnwindReason::Retry,
                    value: Value::Nil,
                    target: Some(owner),
                    tag: Some(Rc::clone(&handler.code)),
                })
            }
            ThrowKind::Return => {
                let target = env.return_target();
                let class_body = !target.lambda && target.code.kind == CodeKind::Class;
                if class_body || !self.is_live(&target) {
                    return Err(self.raise_error(ClassId::LOCAL_JUMP_ERROR, "unexpected return"));
                }
                Ok(aimed(UnwindReason::Return, value, target, false))
            }
        }
    }

    fn raise_value(&mut self, value: Value) -> VmResult<Signal> {
        if !self.kind_of(&value, ClassId::EXCEPTION) {
            return Err(self.raise_error(ClassId::TYPE_ERROR, "exception class/object expected"));
        }
        self.attach_backtrace(&value);
        Ok(Signal::raise(value))
    }

    /// Whether some frame is still executing in `env`
    pub(crate) fn is_live(&self, env: &Rc<Env>) -> bool {
        self.frames.iter().any(|frame| Rc::ptr_eq(&frame.env, env))
    }

    // ===== Unwinding =====

    /// Resolve `signal` against frames above `base`. Returns the value of the
    /// base frame if the signal finished it, or hands the signal back once
    /// every frame above `base` is gone.
    pub(super) fn handle_unwind(&mut self, mut signal: Signal, base: usize) -> VmResult<Option<Value>> {
        loop {
            if self.frames.len() <= base {
                return Err(signal.into());
            }
            let frame = self.frame()?;
            let entry = frame
                .code
                .catch_table
                .iter()
                .find(|entry| entry.covers(frame.pc) && accepts(entry, &signal, &frame.env))
                .cloned();
            if let Some(entry) = entry {
                self.enter_catch(entry, signal)?;
                return Ok(None);
            }

            if frame.owns_target(&signal) {
                match signal.reason {
                    UnwindReason::Next | UnwindReason::Return => {
                        return self.finish_frame(signal.value, base)
                    }
                    UnwindReason::Redo => {
                        let frame = self.frame_mut()?;
                        frame.pc = frame.code.params.body_start;
                        frame.stack.clear();
                        return Ok(None);
                    }
                    UnwindReason::Break => {
                        // the block was called after the call it was attached to returned
                        signal = match self
                            .raise_error(ClassId::LOCAL_JUMP_ERROR, "break from proc-closure")
                        {
                            Control::Unwind(raised) => *raised,
                            internal => return Err(internal),
                        };
                        continue;
                    }
                    UnwindReason::Raise | UnwindReason::Retry => {}
                }
            }

            let popped = self.frames.pop().ok_or_else(super::no_frame)?;
            if popped.code.kind == CodeKind::Rescue {
                self.errinfo = Value::Nil;
            }
            trace!(
                code = %popped.code.label(),
                reason = %signal.reason,
                depth = self.frames.len(),
                "unwind frame"
            );
        }
    }

    /// Transfer control to a matching catch entry of the top frame
    fn enter_catch(&mut self, entry: CatchEntry, signal: Signal) -> VmResult<()> {
        let frame = self.frame_mut()?;
        frame.stack.truncate(entry.sp);
        match entry.kind {
            CatchKind::Rescue | CatchKind::Ensure => {
                frame.pc = entry.end;
                let owner_env = Rc::clone(&frame.env);
                let self_value = frame.self_value.clone();
                let handler = entry.handler.ok_or_else(|| {
                    InternalError::InvalidBytecode("handler entry without code".to_string())
                })?;
                let carried = if entry.kind == CatchKind::Rescue || signal.reason == UnwindReason::Raise {
                    signal.value
                } else {
                    Value::Signal(Rc::new(signal))
                };
                if entry.kind == CatchKind::Rescue {
                    self.errinfo = carried.clone();
                }
                let mut locals = vec![Value::Nil; handler.locals.len().max(1)];
                locals[0] = carried;
                let env = Rc::new(Env {
                    locals: RefCell::new(locals),
                    prev: Some(Rc::clone(&owner_env)),
                    lexical: Rc::clone(&owner_env.lexical),
                    code: Rc::clone(&handler),
                    block: None,
                    method: None,
                    lambda: false,
                    visibility: Cell::new(owner_env.visibility.get()),
                });
                trace!(handler = %handler.label(), depth = self.frames.len(), "enter handler");
                // handler frames are exempt from the frame limit so a
                // SystemStackError can still be rescued
                self.frames.push(CallFrame {
                    code: handler,
                    pc: 0,
                    stack: Vec::new(),
                    self_value,
                    env,
                    handler_cont: Some(entry.cont),
                    kw_passed: Vec::new(),
                });
            }
            CatchKind::Break => {
                frame.pc = entry.cont;
                frame.stack.push(signal.value);
            }
            CatchKind::Next | CatchKind::Redo | CatchKind::Retry => frame.pc = entry.cont,
        }
        Ok(())
    }

    // ===== Exceptions =====

    /// Raise a builtin exception of `class`
    pub(crate) fn raise_error(&mut self, class: ClassId, message: impl Into<String>) -> Control {
        let exception = self.new_exception(class, message.into());
        self.attach_backtrace(&exception);
        Signal::raise(exception).into()
    }

    /// Exception object without running `initialize`
    pub(crate) fn new_exception(&mut self, class: ClassId, message: String) -> Value {
        let object = RObject::new(class);
        object.set_ivar(Symbol::new("__message"), Value::string(message));
        Value::Object(object)
    }

    /// Record the current call stack on an exception raised for the first time
    pub(crate) fn attach_backtrace(&mut self, exception: &Value) {
        if let Value::Object(object) = exception {
            if object.ivar("__backtrace").is_nil() {
                let lines = self.backtrace().into_iter().map(Value::string).collect();
                object.set_ivar(Symbol::new("__backtrace"), Value::array(lines));
            }
        }
    }

    /// `file:line:in 'label'` for each frame, innermost first
    pub fn backtrace(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .take(self.options.backtrace_limit)
            .map(|frame| {
                format!(
                    "{}:{}:in '{}'",
                    frame.code.file,
                    frame.code.line_at(frame.pc),
                    frame.code.label()
                )
            })
            .collect()
    }
}

impl CallFrame {
    /// A non-handler frame running the signal's target environment
    fn owns_target(&self, signal: &Signal) -> bool {
        signal.target.as_ref().map_or(false, |target| self.owns(target))
    }
}

fn accepts(entry: &CatchEntry, signal: &Signal, env: &Rc<Env>) -> bool {
    let reason = match entry.kind {
        CatchKind::Ensure => return true,
        CatchKind::Rescue => return signal.reason == UnwindReason::Raise,
        CatchKind::Retry => UnwindReason::Retry,
        CatchKind::Break => UnwindReason::Break,
        CatchKind::Next => UnwindReason::Next,
        CatchKind::Redo => UnwindReason::Redo,
    };
    signal.reason == reason && entry.tagged(signal.tag.as_ref()) && signal.targets(env)
}

/// Signal aimed at `env`; block-scoped signals are tagged with its code
fn aimed(reason: UnwindReason, value: Value, env: Rc<Env>, block: bool) -> Signal {
    let tag = block.then(|| Rc::clone(&env.code));
    Signal {
        reason,
        value,
        target: Some(env),
        tag,
    }
}

fn hop(env: &Rc<Env>, level: usize) -> VmResult<Rc<Env>> {
    env.up(level).ok_or_else(|| {
        InternalError::InvalidBytecode(format!("throw level {} exceeds environment chain", level))
            .into()
    })
}

//! Stack-based virtual machine
//!
//! Executes code objects on a heap-allocated frame stack.
//! - Each frame has its own operand stack and environment
//! - Calls into compiled code push a frame and return to the dispatch loop;
//!   builtins that call back into guest code run a nested loop with a base
//!   frame index, so re-entrancy never recurses through the interpreter
//!   for plain guest-to-guest calls
//! - Non-local control is a [`Signal`] resolved against catch tables

pub mod dispatch;
pub mod env;
pub mod frame;
pub mod signal;
mod unwind;

pub use dispatch::{BlockCall, Invoke};
pub use env::{Env, LexicalScope, MethodInfo};
pub use frame::CallFrame;
pub use signal::{Control, Signal, UnwindReason, VmResult};

use crate::bytecode::{CodeKind, CodeObject, ConstScope, DefineKind, Op};
use crate::error::{InternalError, RuntimeError};
use crate::object::{ClassId, ClassKind, ClassTable, MethodDef, MethodEntry, Visibility};
use crate::stdlib::{self, OutputWriter};
use crate::symbol::Symbol;
use crate::value::{HashTable, RObject, RangeData, Value};
use garnet_config::VmOptions;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{error, trace, warn};

/// What the dispatch loop does after one instruction
enum Flow {
    /// Advance the pc of the frame that ran the instruction
    Next,
    Jump(usize),
    /// A frame was pushed; the caller resumes when it finishes
    Stay,
    Leave(Value),
}

/// Virtual machine state
pub struct Vm {
    frames: Vec<CallFrame>,
    /// Class and module graph
    pub classes: ClassTable,
    globals: HashMap<Symbol, Value>,
    /// Exception being handled (`$!`)
    errinfo: Value,
    /// Receiver of top-level code
    main: Value,
    output: OutputWriter,
    options: VmOptions,
    /// Nesting of builtin calls currently on the Rust stack
    native_depth: usize,
    /// Stack address of the outermost builtin call in progress
    native_stack_base: usize,
    top_scope: Rc<LexicalScope>,
}

impl Vm {
    pub fn new(options: VmOptions, output: OutputWriter) -> Self {
        let mut vm = Self {
            frames: Vec::new(),
            classes: ClassTable::new(),
            globals: HashMap::new(),
            errinfo: Value::Nil,
            main: Value::Object(RObject::new(ClassId::OBJECT)),
            output,
            options,
            native_depth: 0,
            native_stack_base: 0,
            top_scope: LexicalScope::top(),
        };
        stdlib::install(&mut vm);
        vm
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    pub fn main_object(&self) -> &Value {
        &self.main
    }

    pub(crate) fn output(&self) -> &OutputWriter {
        &self.output
    }

    /// Exception being handled by the innermost active rescue clause
    pub(crate) fn errinfo(&self) -> &Value {
        &self.errinfo
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(Symbol::new(name), value);
    }

    /// Run a top-level code object with `main` as self
    pub fn execute(&mut self, code: &Rc<CodeObject>) -> Result<Value, RuntimeError> {
        let main = self.main.clone();
        self.execute_in(code, main)
    }

    /// Run a top-level code object with a chosen receiver. A class receiver
    /// also becomes the lexical scope, so `def` and constants land in it.
    pub fn execute_in(
        &mut self,
        code: &Rc<CodeObject>,
        self_value: Value,
    ) -> Result<Value, RuntimeError> {
        let visibility = if code.kind == CodeKind::Main {
            Visibility::Private
        } else {
            Visibility::Public
        };
        let lexical = match self_value {
            Value::Class(class) => LexicalScope::nested(&self.top_scope, class),
            _ => Rc::clone(&self.top_scope),
        };
        let env = Rc::new(Env {
            locals: RefCell::new(vec![Value::Nil; code.locals.len()]),
            prev: None,
            lexical,
            code: Rc::clone(code),
            block: None,
            method: None,
            lambda: false,
            visibility: Cell::new(visibility),
        });
        let base = self.frames.len();
        let frame = CallFrame {
            code: Rc::clone(code),
            pc: 0,
            stack: Vec::new(),
            self_value,
            env,
            handler_cont: None,
            kw_passed: Vec::new(),
        };
        let result = self.push_frame(frame).and_then(|()| self.run(base));
        self.frames.truncate(base);
        match result {
            Ok(value) => Ok(value),
            Err(Control::Internal(err)) => Err(err.into()),
            Err(Control::Unwind(signal)) => Err(self.escaped(*signal)),
        }
    }

    /// Report a signal that left every frame
    fn escaped(&mut self, signal: Signal) -> RuntimeError {
        if signal.reason != UnwindReason::Raise {
            return InternalError::UnhandledSignal {
                reason: signal.reason.to_string(),
            }
            .into();
        }
        let exception = signal.value;
        let class_id = self.real_class_of(&exception);
        let class = self.classes.name_of(class_id);
        let message = self.exception_message(&exception);
        let backtrace = match &exception {
            Value::Object(object) => match object.ivar("__backtrace") {
                Value::Array(lines) => lines
                    .borrow()
                    .iter()
                    .map(|line| stdlib::plain_to_s(&self.classes, line))
                    .collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        self.errinfo = Value::Nil;
        error!(%class, %message, "uncaught exception");
        RuntimeError::Uncaught {
            class,
            message,
            backtrace,
        }
    }

    /// Guest `message`, falling back to the stored text if that call fails
    pub(crate) fn exception_message(&mut self, exception: &Value) -> String {
        let depth = self.frames.len();
        let message = self.call_method(exception, "message", Vec::new(), None);
        self.frames.truncate(depth);
        match message {
            Ok(Value::String(text)) => text.borrow().clone(),
            _ => match exception {
                Value::Object(object) => match object.ivar("__message") {
                    Value::String(text) => text.borrow().clone(),
                    _ => {
                        let class = self.real_class_of(exception);
                        self.classes.name_of(class)
                    }
                },
                other => stdlib::plain_to_s(&self.classes, other),
            },
        }
    }

    /// Guest `inspect` for host display; plain text if the guest method fails
    pub fn inspect_value(&mut self, value: &Value) -> String {
        let depth = self.frames.len();
        let text = stdlib::inspect(self, value);
        self.frames.truncate(depth);
        text.unwrap_or_else(|_| stdlib::plain_inspect(&self.classes, value))
    }

    // ===== Dispatch loop =====

    /// Execute until the frame at index `base` finishes, returning its value
    pub(crate) fn run(&mut self, base: usize) -> VmResult<Value> {
        loop {
            let index = self.frames.len().saturating_sub(1);
            let outcome = match self.step() {
                Ok(Flow::Next) => {
                    if let Some(frame) = self.frames.get_mut(index) {
                        frame.pc += 1;
                    }
                    Ok(None)
                }
                Ok(Flow::Jump(target)) => {
                    if let Some(frame) = self.frames.get_mut(index) {
                        frame.pc = target;
                    }
                    Ok(None)
                }
                Ok(Flow::Stay) => Ok(None),
                Ok(Flow::Leave(value)) => self.finish_frame(value, base),
                Err(Control::Unwind(signal)) => self.handle_unwind(*signal, base),
                Err(internal) => return Err(internal),
            };
            if let Some(value) = outcome? {
                return Ok(value);
            }
        }
    }

    fn step(&mut self) -> VmResult<Flow> {
        let frame = self.frame()?;
        let code = Rc::clone(&frame.code);
        let pc = frame.pc;
        let instruction = code.instructions.get(pc).ok_or_else(|| InternalError::PcOutOfRange {
            code: code.label(),
            pc,
        })?;
        self.exec(&instruction.op)
    }

    /// Pop the finished top frame and hand `value` to whoever resumes
    fn finish_frame(&mut self, value: Value, base: usize) -> VmResult<Option<Value>> {
        let frame = self.frames.pop().ok_or_else(no_frame)?;
        trace!(code = %frame.code.label(), depth = self.frames.len(), "pop frame");
        if let Some(cont) = frame.handler_cont {
            if frame.code.kind == CodeKind::Rescue {
                self.errinfo = Value::Nil;
            }
            let owner = self.frames.last_mut().ok_or_else(no_frame)?;
            owner.pc = cont;
            owner.stack.push(value);
            return Ok(None);
        }
        if self.frames.len() <= base {
            return Ok(Some(value));
        }
        let caller = self.frames.last_mut().ok_or_else(no_frame)?;
        caller.stack.push(value);
        caller.pc += 1;
        Ok(None)
    }

    pub(crate) fn push_frame(&mut self, frame: CallFrame) -> VmResult<()> {
        if self.frames.len() >= self.options.max_frames {
            return Err(self.raise_error(ClassId::SYSTEM_STACK_ERROR, "stack level too deep"));
        }
        trace!(code = %frame.code.label(), depth = self.frames.len(), "push frame");
        self.frames.push(frame);
        Ok(())
    }

    // ===== Frame and stack access =====

    pub(crate) fn frame(&self) -> VmResult<&CallFrame> {
        self.frames.last().ok_or_else(|| no_frame().into())
    }

    fn frame_mut(&mut self) -> VmResult<&mut CallFrame> {
        self.frames.last_mut().ok_or_else(|| no_frame().into())
    }

    pub(crate) fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        self.frame_mut()?.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        let frame = self.frame_mut()?;
        match frame.stack.pop() {
            Some(value) => Ok(value),
            None => Err(underflow(frame).into()),
        }
    }

    /// Pop `n` values, oldest first
    fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let frame = self.frame_mut()?;
        if frame.stack.len() < n {
            return Err(underflow(frame).into());
        }
        let at = frame.stack.len() - n;
        Ok(frame.stack.split_off(at))
    }

    fn peek(&self, n: usize) -> VmResult<Value> {
        let frame = self.frame()?;
        frame
            .stack
            .len()
            .checked_sub(n + 1)
            .and_then(|i| frame.stack.get(i).cloned())
            .ok_or_else(|| underflow(frame).into())
    }

    fn self_value(&self) -> VmResult<Value> {
        Ok(self.frame()?.self_value.clone())
    }

    /// Environment that `def` and visibility changes apply to: the nearest
    /// non-handler environment of the current frame
    pub(crate) fn scope_env(&self) -> VmResult<Rc<Env>> {
        let mut env = Rc::clone(&self.frame()?.env);
        while env.code.kind.is_handler() {
            match env.prev.clone() {
                Some(prev) => env = prev,
                None => break,
            }
        }
        Ok(env)
    }

    /// Class that `def`, constants and class variables refer to
    pub(crate) fn cref(&self) -> VmResult<ClassId> {
        Ok(self.frame()?.env.lexical.class)
    }

    /// Visibility for a `def` in the current scope
    pub(crate) fn default_visibility(&self) -> VmResult<Visibility> {
        let env = self.scope_env()?;
        Ok(match env.code.kind {
            CodeKind::Class | CodeKind::Main => env.visibility.get(),
            _ => Visibility::Public,
        })
    }

    // ===== Instructions =====

    fn exec(&mut self, op: &Op) -> VmResult<Flow> {
        match op {
            // ===== Literals =====
            Op::PutNil => self.push(Value::Nil)?,
            Op::PutTrue => self.push(Value::True)?,
            Op::PutFalse => self.push(Value::False)?,
            Op::PutSelf => {
                let value = self.self_value()?;
                self.push(value)?;
            }
            Op::PutObject(value) => self.push(value.clone())?,
            Op::PutString(text) => self.push(Value::string(&**text))?,

            // ===== Stack =====
            Op::Pop => {
                self.pop()?;
            }
            Op::Dup => {
                let value = self.peek(0)?;
                self.push(value)?;
            }
            Op::Swap => {
                let top = self.pop()?;
                let below = self.pop()?;
                self.push(top)?;
                self.push(below)?;
            }
            Op::TopN(n) => {
                let value = self.peek(*n)?;
                self.push(value)?;
            }
            Op::SetN(n) => {
                let value = self.peek(0)?;
                let frame = self.frame_mut()?;
                let len = frame.stack.len();
                match len.checked_sub(n + 1) {
                    Some(index) => frame.stack[index] = value,
                    None => return Err(underflow(frame).into()),
                }
            }

            // ===== Variables =====
            Op::GetLocal { slot, depth } => {
                let env = Rc::clone(&self.frame()?.env);
                let value = env
                    .up(*depth)
                    .and_then(|env| env.get(*slot))
                    .ok_or(InternalError::BadLocal {
                        slot: *slot,
                        depth: *depth,
                    })?;
                self.push(value)?;
            }
            Op::SetLocal { slot, depth } => {
                let value = self.pop()?;
                let env = Rc::clone(&self.frame()?.env);
                let stored = env.up(*depth).map_or(false, |env| env.set(*slot, value));
                if !stored {
                    return Err(InternalError::BadLocal {
                        slot: *slot,
                        depth: *depth,
                    }
                    .into());
                }
            }
            Op::GetIvar(name) => {
                let receiver = self.self_value()?;
                let value = self.ivar_get(&receiver, name.as_str());
                self.push(value)?;
            }
            Op::SetIvar(name) => {
                let value = self.pop()?;
                let receiver = self.self_value()?;
                self.ivar_set(&receiver, name.clone(), value)?;
            }
            Op::GetGlobal(name) => {
                let value = if name.as_str() == "$!" {
                    self.errinfo.clone()
                } else {
                    self.globals.get(name).cloned().unwrap_or(Value::Nil)
                };
                self.push(value)?;
            }
            Op::SetGlobal(name) => {
                let value = self.pop()?;
                self.globals.insert(name.clone(), value);
            }
            Op::GetCvar(name) => {
                let cref = self.cref()?;
                let value = match self.classes.cvar_owner(cref, name.as_str()) {
                    Some(owner) => self
                        .classes
                        .get(owner)
                        .class_vars
                        .get(name)
                        .cloned()
                        .unwrap_or(Value::Nil),
                    None => {
                        let class = self.classes.name_of(cref);
                        return Err(self.raise_error(
                            ClassId::NAME_ERROR,
                            format!("uninitialized class variable {} in {}", name, class),
                        ));
                    }
                };
                self.push(value)?;
            }
            Op::SetCvar(name) => {
                let value = self.pop()?;
                let cref = self.cref()?;
                let owner = self.classes.cvar_owner(cref, name.as_str()).unwrap_or(cref);
                self.classes
                    .get_mut(owner)
                    .class_vars
                    .insert(name.clone(), value);
            }
            Op::GetConst { name, scope } => {
                let value = self.get_const(name, *scope)?;
                self.push(value)?;
            }
            Op::SetConst { name, scoped } => {
                let container = if *scoped {
                    let scope = self.pop()?;
                    self.expect_module(&scope)?
                } else {
                    self.cref()?
                };
                let value = self.pop()?;
                self.classes.set_constant(container, name.clone(), value);
            }

            // ===== Collections =====
            Op::NewArray(n) => {
                let items = self.pop_n(*n)?;
                self.push(Value::array(items))?;
            }
            Op::SplatArray => {
                let value = self.pop()?;
                let items = self.splat_items(&value);
                self.push(Value::array(items))?;
            }
            Op::ConcatArray => {
                let tail = self.pop()?;
                let head = self.pop()?;
                let mut items = self.splat_items(&head);
                items.extend(self.splat_items(&tail));
                self.push(Value::array(items))?;
            }
            Op::NewHash(n) => {
                let items = self.pop_n(*n)?;
                let table = Rc::new(RefCell::new(HashTable::new()));
                let mut pairs = items.into_iter();
                while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
                    stdlib::hash::hash_set(self, &table, key, value)?;
                }
                self.push(Value::Hash(table))?;
            }
            Op::NewRange { exclusive } => {
                let end = self.pop()?;
                let start = self.pop()?;
                self.push(Value::Range(Rc::new(RangeData {
                    start,
                    end,
                    exclusive: *exclusive,
                })))?;
            }
            Op::ToS => {
                if !matches!(self.peek(0)?, Value::String(_)) {
                    let value = self.pop()?;
                    let invoke = self.dispatch(&value, "to_s", Vec::new(), None, false)?;
                    return self.finish_invoke(invoke);
                }
            }
            Op::ConcatStrings(n) => {
                let parts = self.pop_n(*n)?;
                let mut text = String::new();
                for part in &parts {
                    match part {
                        Value::String(s) => text.push_str(&s.borrow()),
                        other => text.push_str(&stdlib::plain_to_s(&self.classes, other)),
                    }
                }
                self.push(Value::string(text))?;
            }
            Op::ExpandArray { count, rest, post } => {
                let value = self.pop()?;
                let items = match &value {
                    Value::Array(items) => items.borrow().clone(),
                    Value::Nil if !post => Vec::new(),
                    other => vec![other.clone()],
                };
                self.expand_array(items, *count, *rest, *post)?;
            }

            // ===== Control =====
            Op::Jump(target) => return Ok(Flow::Jump(*target)),
            Op::BranchIf(target) => {
                if self.pop()?.is_truthy() {
                    return Ok(Flow::Jump(*target));
                }
            }
            Op::BranchUnless(target) => {
                if !self.pop()?.is_truthy() {
                    return Ok(Flow::Jump(*target));
                }
            }

            // ===== Calls =====
            Op::Send(info) => return self.exec_send(info),
            Op::InvokeSuper { info, .. } => return self.exec_super(info),
            Op::InvokeBlock { argc, splat } => return self.exec_yield(*argc, *splat),
            Op::CheckMatch { splat } => return self.exec_check_match(*splat),

            // ===== Definitions =====
            Op::DefineMethod {
                name,
                code,
                singleton,
            } => self.define_method(name, code, *singleton)?,
            Op::DefineClass {
                name,
                code,
                kind,
                scope,
            } => {
                self.define_class(name, code, *kind, *scope)?;
                return Ok(Flow::Stay);
            }
            Op::Alias { new_name, old_name } => {
                let cref = self.cref()?;
                self.alias_method(cref, new_name, old_name)?;
                self.push(Value::Nil)?;
            }
            Op::Undef(name) => {
                let cref = self.cref()?;
                if self.classes.find_method(cref, name.as_str()).is_none() {
                    let class = self.classes.name_of(cref);
                    return Err(self.raise_error(
                        ClassId::NAME_ERROR,
                        format!("undefined method '{}' for class '{}'", name, class),
                    ));
                }
                self.classes.add_method(
                    cref,
                    MethodEntry {
                        name: name.clone(),
                        owner: cref,
                        visibility: Visibility::Public,
                        def: MethodDef::Undefined,
                    },
                );
                self.push(Value::Nil)?;
            }
            Op::CheckKeyword(index) => {
                let passed = self.frame()?.kw_passed.get(*index).copied().unwrap_or(false);
                self.push(Value::bool(passed))?;
            }

            // ===== Unwinding and exit =====
            Op::Throw(kind) => return Err(self.throw(*kind)),
            Op::Leave => return Ok(Flow::Leave(self.pop()?)),
            Op::Nop => {}
        }
        Ok(Flow::Next)
    }

    /// Push the result of a call made by an instruction
    fn finish_invoke(&mut self, invoke: Invoke) -> VmResult<Flow> {
        match invoke {
            Invoke::Done(value) => {
                self.push(value)?;
                Ok(Flow::Next)
            }
            Invoke::Pushed => Ok(Flow::Stay),
        }
    }

    /// Elements a splat spreads: arrays as-is, integer ranges expanded, nil
    /// as nothing, anything else as itself
    pub(crate) fn splat_items(&self, value: &Value) -> Vec<Value> {
        match value {
            Value::Array(items) => items.borrow().clone(),
            Value::Nil => Vec::new(),
            Value::Range(range) => match range.int_bounds() {
                Some((low, high)) => (low..=high).map(Value::Integer).collect(),
                None => vec![value.clone()],
            },
            other => vec![other.clone()],
        }
    }

    fn expand_array(
        &mut self,
        items: Vec<Value>,
        count: usize,
        rest: bool,
        post: bool,
    ) -> VmResult<()> {
        if post {
            // suffix phase: last `count` elements, then the shortened rest on top
            let split = items.len().saturating_sub(count);
            let mut tail: Vec<Value> = items[split..].to_vec();
            tail.resize(count, Value::Nil);
            for value in tail.into_iter().rev() {
                self.push(value)?;
            }
            self.push(Value::array(items[..split].to_vec()))?;
        } else {
            if rest {
                let remainder = items.get(count..).map(<[Value]>::to_vec).unwrap_or_default();
                self.push(Value::array(remainder))?;
            }
            for index in (0..count).rev() {
                self.push(items.get(index).cloned().unwrap_or(Value::Nil))?;
            }
        }
        Ok(())
    }

    fn exec_check_match(&mut self, splat: bool) -> VmResult<Flow> {
        let pattern = self.pop()?;
        let subject = self.pop()?;
        if !splat {
            let invoke = self.dispatch(&pattern, "===", vec![subject], None, false)?;
            return self.finish_invoke(invoke);
        }
        let mut matched = false;
        for candidate in self.splat_items(&pattern) {
            if self
                .call_method(&candidate, "===", vec![subject.clone()], None)?
                .is_truthy()
            {
                matched = true;
                break;
            }
        }
        self.push(Value::bool(matched))?;
        Ok(Flow::Next)
    }

    // ===== Instance variables =====

    pub(crate) fn ivar_get(&self, receiver: &Value, name: &str) -> Value {
        match receiver {
            Value::Object(object) => object.ivar(name),
            Value::Class(class) => self
                .classes
                .get(*class)
                .ivars
                .get(name)
                .cloned()
                .unwrap_or(Value::Nil),
            _ => Value::Nil,
        }
    }

    pub(crate) fn ivar_set(&mut self, receiver: &Value, name: Symbol, value: Value) -> VmResult<()> {
        match receiver {
            Value::Object(object) => object.set_ivar(name, value),
            Value::Class(class) => {
                self.classes.get_mut(*class).ivars.insert(name, value);
            }
            other => {
                let class = self.real_class_of(other);
                let class = self.classes.name_of(class);
                return Err(self.raise_error(
                    ClassId::RUNTIME_ERROR,
                    format!("can't modify frozen {}", class),
                ));
            }
        }
        Ok(())
    }

    // ===== Constants =====

    fn get_const(&mut self, name: &Symbol, scope: ConstScope) -> VmResult<Value> {
        let found = match scope {
            ConstScope::Lexical => {
                let lexical = Rc::clone(&self.frame()?.env.lexical);
                self.lookup_const(&lexical, name.as_str())
            }
            ConstScope::Scoped => {
                let container = self.pop()?;
                let class = self.expect_module(&container)?;
                match self.classes.inherited_constant(class, name.as_str()) {
                    Some(value) => Some(value),
                    None => {
                        let class = self.classes.name_of(class);
                        return Err(self.raise_error(
                            ClassId::NAME_ERROR,
                            format!("uninitialized constant {}::{}", class, name),
                        ));
                    }
                }
            }
            ConstScope::Top => self.classes.own_constant(ClassId::OBJECT, name.as_str()),
        };
        match found {
            Some(value) => Ok(value),
            None => Err(self.raise_error(
                ClassId::NAME_ERROR,
                format!("uninitialized constant {}", name),
            )),
        }
    }

    /// Lexical scopes innermost first (excluding the top level), then the
    /// ancestors of the innermost class, then `Object`
    pub(crate) fn lookup_const(&self, lexical: &Rc<LexicalScope>, name: &str) -> Option<Value> {
        let mut scope = Some(lexical);
        while let Some(current) = scope {
            if current.parent.is_none() {
                break;
            }
            if let Some(value) = self.classes.own_constant(current.class, name) {
                return Some(value);
            }
            scope = current.parent.as_ref();
        }
        self.classes
            .inherited_constant(lexical.class, name)
            .or_else(|| self.classes.own_constant(ClassId::OBJECT, name))
    }

    pub(crate) fn expect_module(&mut self, value: &Value) -> VmResult<ClassId> {
        match value {
            Value::Class(class) => Ok(*class),
            other => {
                let shown = stdlib::plain_inspect(&self.classes, other);
                Err(self.raise_error(
                    ClassId::TYPE_ERROR,
                    format!("{} is not a class/module", shown),
                ))
            }
        }
    }

    // ===== Definitions =====

    fn define_method(
        &mut self,
        name: &Symbol,
        code: &Rc<CodeObject>,
        singleton: bool,
    ) -> VmResult<()> {
        let (target, mut visibility) = if singleton {
            let receiver = self.pop()?;
            (self.singleton_class_of(&receiver)?, Visibility::Public)
        } else {
            (self.cref()?, self.default_visibility()?)
        };
        if name.as_str() == "initialize" {
            visibility = Visibility::Private;
        }
        let lexical = Rc::clone(&self.frame()?.env.lexical);
        self.install_method(
            target,
            MethodEntry {
                name: name.clone(),
                owner: target,
                visibility,
                def: MethodDef::Iseq {
                    code: Rc::clone(code),
                    lexical,
                },
            },
        );
        self.push(Value::Symbol(name.clone()))
    }

    /// Add a method, logging a replaced definition when configured to
    pub(crate) fn install_method(&mut self, class: ClassId, entry: MethodEntry) {
        let name = entry.name.clone();
        let replaced = self.classes.add_method(class, entry);
        if replaced.is_some() && self.options.warn_redefinition {
            warn!(
                class = %self.classes.name_of(class),
                method = %name,
                "method redefined"
            );
        }
    }

    pub(crate) fn alias_method(
        &mut self,
        class: ClassId,
        new_name: &Symbol,
        old_name: &Symbol,
    ) -> VmResult<()> {
        let Some(original) = self.classes.find_method(class, old_name.as_str()) else {
            let shown = self.classes.name_of(class);
            return Err(self.raise_error(
                ClassId::NAME_ERROR,
                format!("undefined method '{}' for class '{}'", old_name, shown),
            ));
        };
        self.install_method(
            class,
            MethodEntry {
                name: new_name.clone(),
                owner: class,
                visibility: original.visibility,
                def: MethodDef::Alias(original.resolved()),
            },
        );
        Ok(())
    }

    /// Open (or create) the class or module and push a frame for its body
    fn define_class(
        &mut self,
        name: &Symbol,
        code: &Rc<CodeObject>,
        kind: DefineKind,
        scope: ConstScope,
    ) -> VmResult<()> {
        let class = match kind {
            DefineKind::Singleton => {
                let receiver = self.pop()?;
                self.singleton_class_of(&receiver)?
            }
            DefineKind::Class { has_super } => {
                let superclass = if has_super { Some(self.pop()?) } else { None };
                let container = self.const_container(scope)?;
                self.open_class(container, name, superclass)?
            }
            DefineKind::Module => {
                let container = self.const_container(scope)?;
                self.open_module(container, name)?
            }
        };
        let outer = Rc::clone(&self.frame()?.env.lexical);
        let env = Rc::new(Env {
            locals: RefCell::new(vec![Value::Nil; code.locals.len()]),
            prev: None,
            lexical: LexicalScope::nested(&outer, class),
            code: Rc::clone(code),
            block: None,
            method: None,
            lambda: false,
            visibility: Cell::new(Visibility::Public),
        });
        self.push_frame(CallFrame {
            code: Rc::clone(code),
            pc: 0,
            stack: Vec::new(),
            self_value: Value::Class(class),
            env,
            handler_cont: None,
            kw_passed: Vec::new(),
        })
    }

    fn const_container(&mut self, scope: ConstScope) -> VmResult<ClassId> {
        match scope {
            ConstScope::Lexical => self.cref(),
            ConstScope::Scoped => {
                let container = self.pop()?;
                self.expect_module(&container)
            }
            ConstScope::Top => Ok(ClassId::OBJECT),
        }
    }

    fn open_class(
        &mut self,
        container: ClassId,
        name: &Symbol,
        superclass: Option<Value>,
    ) -> VmResult<ClassId> {
        let superclass = match superclass {
            Some(value) => match value {
                Value::Class(id) if self.classes.get(id).kind == ClassKind::Class => Some(id),
                _ => {
                    return Err(
                        self.raise_error(ClassId::TYPE_ERROR, "superclass must be a Class")
                    )
                }
            },
            None => None,
        };
        match self.classes.own_constant(container, name.as_str()) {
            Some(Value::Class(existing)) if self.classes.get(existing).kind == ClassKind::Class => {
                if let Some(requested) = superclass {
                    if self.classes.superclass_of(existing) != Some(requested) {
                        return Err(self.raise_error(
                            ClassId::TYPE_ERROR,
                            format!("superclass mismatch for class {}", name),
                        ));
                    }
                }
                Ok(existing)
            }
            Some(_) => Err(self.raise_error(
                ClassId::TYPE_ERROR,
                format!("{} is not a class", name),
            )),
            None => {
                let class = self
                    .classes
                    .define_class(None, superclass.unwrap_or(ClassId::OBJECT));
                self.classes
                    .set_constant(container, name.clone(), Value::Class(class));
                Ok(class)
            }
        }
    }

    fn open_module(&mut self, container: ClassId, name: &Symbol) -> VmResult<ClassId> {
        match self.classes.own_constant(container, name.as_str()) {
            Some(Value::Class(existing)) if self.classes.get(existing).is_module() => Ok(existing),
            Some(_) => Err(self.raise_error(
                ClassId::TYPE_ERROR,
                format!("{} is not a module", name),
            )),
            None => {
                let module = self.classes.define_module(None);
                self.classes
                    .set_constant(container, name.clone(), Value::Class(module));
                Ok(module)
            }
        }
    }
}

fn no_frame() -> InternalError {
    InternalError::InvalidBytecode("no active frame".to_string())
}

fn underflow(frame: &CallFrame) -> InternalError {
    InternalError::StackUnderflow {
        code: frame.code.label(),
        pc: frame.pc,
    }
}

//! Method dispatch, argument binding and closure invocation

use super::{CallFrame, Env, Flow, LexicalScope, MethodInfo, Vm, VmResult};
use crate::bytecode::{CallInfo, CodeObject};
use crate::object::{ClassId, ClassKind, MethodDef, MethodEntry, Visibility};
use crate::symbol::Symbol;
use crate::value::{Proc, ProcBody, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Rust stack that nested builtin calls may use, measured from the
/// outermost builtin call. Stays well inside a 2 MiB thread stack.
const NATIVE_STACK_BUDGET: usize = 1 << 20;

/// Approximate current stack pointer
#[inline(never)]
fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

/// Outcome of starting a call
#[derive(Debug)]
pub enum Invoke {
    /// A frame was pushed; its value arrives when it finishes
    Pushed,
    /// A builtin ran to completion
    Done(Value),
}

/// How a closure is entered
#[derive(Debug, Clone, Default)]
pub struct BlockCall {
    /// Replaces the captured receiver (`instance_eval`, `define_method`)
    pub self_value: Option<Value>,
    /// Replaces the captured constant scope (`class_eval`)
    pub lexical: Option<Rc<LexicalScope>>,
    /// Method identity for `super` inside a `define_method` body
    pub method: Option<MethodInfo>,
    pub lambda: bool,
}

/// Initial locals and entry pc for a new frame
struct Binding {
    locals: Vec<Value>,
    pc: usize,
    kw_passed: Vec<bool>,
}

impl Vm {
    // ===== Classes of values =====

    /// Class whose method table a call on `value` starts from; creates
    /// metaclasses on demand
    pub fn class_of(&mut self, value: &Value) -> ClassId {
        match value {
            Value::Nil => ClassId::NIL_CLASS,
            Value::True => ClassId::TRUE_CLASS,
            Value::False => ClassId::FALSE_CLASS,
            Value::Integer(_) => ClassId::INTEGER,
            Value::Float(_) => ClassId::FLOAT,
            Value::Symbol(_) => ClassId::SYMBOL,
            Value::String(_) => ClassId::STRING,
            Value::Array(_) => ClassId::ARRAY,
            Value::Hash(_) => ClassId::HASH,
            Value::Range(_) => ClassId::RANGE,
            Value::Proc(_) => ClassId::PROC,
            Value::Object(object) => object.class.get(),
            Value::Class(class) => self.classes.metaclass_of(*class),
            Value::Signal(_) => ClassId::OBJECT,
        }
    }

    /// Class as the guest sees it (`obj.class`)
    pub fn real_class_of(&mut self, value: &Value) -> ClassId {
        match value {
            Value::Class(class) if self.classes.get(*class).is_module() => ClassId::MODULE,
            Value::Class(_) => ClassId::CLASS,
            other => {
                let class = self.class_of(other);
                self.classes.real_class(class)
            }
        }
    }

    pub fn kind_of(&mut self, value: &Value, class: ClassId) -> bool {
        let own = self.class_of(value);
        self.classes.inherits(own, class)
    }

    /// Singleton class of an object or class, created on first use
    pub fn singleton_class_of(&mut self, value: &Value) -> VmResult<ClassId> {
        match value {
            Value::Class(class) => Ok(self.classes.metaclass_of(*class)),
            Value::Object(object) => {
                let current = object.class.get();
                if let ClassKind::Singleton { attached } = &self.classes.get(current).kind {
                    if attached.identical(value) {
                        return Ok(current);
                    }
                }
                let singleton = self.classes.new_singleton(value.clone(), current);
                object.class.set(singleton);
                Ok(singleton)
            }
            other => {
                let class = self.real_class_of(other);
                let class = self.classes.name_of(class);
                Err(self.raise_error(
                    ClassId::TYPE_ERROR,
                    format!("can't define singleton for {}", class),
                ))
            }
        }
    }

    /// Receiver description used by `NoMethodError` messages
    pub(crate) fn describe_receiver(&mut self, value: &Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::True => "true".to_string(),
            Value::False => "false".to_string(),
            Value::Class(class) => {
                let kind = if self.classes.get(*class).is_module() {
                    "module"
                } else {
                    "class"
                };
                format!("{} {}", kind, self.classes.name_of(*class))
            }
            other if other.identical(&self.main) => "main".to_string(),
            other => {
                let class = self.real_class_of(other);
                format!("an instance of {}", self.classes.name_of(class))
            }
        }
    }

    // ===== Call instructions =====

    pub(super) fn exec_send(&mut self, info: &CallInfo) -> VmResult<Flow> {
        let block = self.call_block_arg(info)?;
        let args = self.pop_call_args(info.argc, info.splat)?;
        let receiver = self.pop()?;
        let invoke = self.dispatch(&receiver, info.name.as_str(), args, block, info.fcall)?;
        self.finish_invoke(invoke)
    }

    /// `super`: the current block is passed along unless one is given
    pub(super) fn exec_super(&mut self, info: &CallInfo) -> VmResult<Flow> {
        let explicit = self.call_block_arg(info)?;
        let args = self.pop_call_args(info.argc, info.splat)?;
        let frame = self.frame()?;
        let env = Rc::clone(&frame.env);
        let receiver = frame.self_value.clone();
        let block = explicit.or_else(|| env.home().block.clone());
        let Some(method) = env.method_info() else {
            return Err(self.raise_error(ClassId::RUNTIME_ERROR, "super called outside of method"));
        };
        let class = self.class_of(&receiver);
        match self
            .classes
            .find_super_method(class, method.owner, method.name.as_str())
        {
            Some(entry) => {
                let invoke = self.invoke_method(&entry, &receiver, args, block)?;
                self.finish_invoke(invoke)
            }
            None => {
                let described = self.describe_receiver(&receiver);
                Err(self.raise_error(
                    ClassId::NO_METHOD_ERROR,
                    format!(
                        "super: no superclass method '{}' for {}",
                        method.name, described
                    ),
                ))
            }
        }
    }

    pub(super) fn exec_yield(&mut self, argc: usize, splat: bool) -> VmResult<Flow> {
        let args = self.pop_call_args(argc, splat)?;
        let env = Rc::clone(&self.frame()?.env);
        let Some(block) = env.home().block.clone() else {
            return Err(self.raise_error(ClassId::LOCAL_JUMP_ERROR, "no block given (yield)"));
        };
        let invoke = self.invoke_proc(&block, args, None, BlockCall::default())?;
        self.finish_invoke(invoke)
    }

    /// Block for a call: a `&value` argument above the arguments, or a
    /// closure over the current frame for a literal block
    fn call_block_arg(&mut self, info: &CallInfo) -> VmResult<Option<Rc<Proc>>> {
        if info.block_arg {
            let value = self.pop()?;
            return self.to_proc(value);
        }
        match &info.block {
            Some(code) => {
                let frame = self.frame()?;
                Ok(Some(Proc::block(
                    Rc::clone(code),
                    Rc::clone(&frame.env),
                    frame.self_value.clone(),
                )))
            }
            None => Ok(None),
        }
    }

    fn pop_call_args(&mut self, argc: usize, splat: bool) -> VmResult<Vec<Value>> {
        let mut args = self.pop_n(argc)?;
        if !splat {
            return Ok(args);
        }
        Ok(match args.pop() {
            Some(list) => self.splat_items(&list),
            None => Vec::new(),
        })
    }

    /// Convert a `&value` block argument
    pub(crate) fn to_proc(&mut self, value: Value) -> VmResult<Option<Rc<Proc>>> {
        match value {
            Value::Nil => Ok(None),
            Value::Proc(proc) => Ok(Some(proc)),
            Value::Symbol(name) => Ok(Some(Rc::new(Proc {
                body: ProcBody::Symbol(name),
                lambda: true,
            }))),
            other => {
                let class = self.real_class_of(&other);
                let class = self.classes.name_of(class);
                Err(self.raise_error(
                    ClassId::TYPE_ERROR,
                    format!("wrong argument type {} (expected Proc)", class),
                ))
            }
        }
    }

    // ===== Method dispatch =====

    /// Look up `name` on the receiver's class and start the call. Without
    /// `fcall` only public methods (and protected ones from a kindred self)
    /// are reachable.
    pub fn dispatch(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        block: Option<Rc<Proc>>,
        fcall: bool,
    ) -> VmResult<Invoke> {
        let class = self.class_of(receiver);
        let Some(entry) = self.classes.find_method(class, name) else {
            return self.method_missing(receiver, name, args, block);
        };
        if !fcall && entry.visibility != Visibility::Public {
            let caller = self.frames.last().map(|frame| frame.self_value.clone());
            let allowed = entry.visibility == Visibility::Protected
                && caller.map_or(false, |caller| self.kind_of(&caller, entry.owner));
            if !allowed {
                let kind = if entry.visibility == Visibility::Private {
                    "private"
                } else {
                    "protected"
                };
                let described = self.describe_receiver(receiver);
                return Err(self.raise_error(
                    ClassId::NO_METHOD_ERROR,
                    format!("{} method '{}' called for {}", kind, name, described),
                ));
            }
        }
        self.invoke_method(&entry, receiver, args, block)
    }

    /// A guest-defined `method_missing` gets the name prepended to the
    /// arguments; otherwise the call fails with `NoMethodError`
    fn method_missing(
        &mut self,
        receiver: &Value,
        name: &str,
        mut args: Vec<Value>,
        block: Option<Rc<Proc>>,
    ) -> VmResult<Invoke> {
        let class = self.class_of(receiver);
        if let Some(handler) = self.classes.find_method(class, "method_missing") {
            if handler.owner != ClassId::KERNEL && name != "method_missing" {
                args.insert(0, Value::Symbol(Symbol::new(name)));
                return self.invoke_method(&handler, receiver, args, block);
            }
        }
        Err(self.no_method_error(receiver, name))
    }

    pub(crate) fn no_method_error(&mut self, receiver: &Value, name: &str) -> super::Control {
        let described = self.describe_receiver(receiver);
        self.raise_error(
            ClassId::NO_METHOD_ERROR,
            format!("undefined method '{}' for {}", name, described),
        )
    }

    /// Start running a resolved method entry
    pub fn invoke_method(
        &mut self,
        entry: &Rc<MethodEntry>,
        receiver: &Value,
        args: Vec<Value>,
        block: Option<Rc<Proc>>,
    ) -> VmResult<Invoke> {
        match &entry.def {
            MethodDef::Native { func, arity } => {
                if !arity.accepts(args.len()) {
                    return Err(self.arity_error(args.len(), &arity.describe()));
                }
                let here = stack_address();
                if self.native_depth == 0 {
                    self.native_stack_base = here;
                }
                if self.native_depth >= self.options.max_native_depth
                    || self.native_stack_base.abs_diff(here) > NATIVE_STACK_BUDGET
                {
                    return Err(
                        self.raise_error(ClassId::SYSTEM_STACK_ERROR, "stack level too deep")
                    );
                }
                self.native_depth += 1;
                let result = func(self, receiver, &args, block.as_ref());
                self.native_depth -= 1;
                result.map(Invoke::Done)
            }
            MethodDef::Iseq { code, lexical } => {
                let binding = self.bind_args(code, args, block.as_ref(), true)?;
                let env = Rc::new(Env {
                    locals: RefCell::new(binding.locals),
                    prev: None,
                    lexical: Rc::clone(lexical),
                    code: Rc::clone(code),
                    block,
                    method: Some(MethodInfo {
                        name: entry.name.clone(),
                        owner: entry.owner,
                    }),
                    lambda: false,
                    visibility: Cell::new(Visibility::Public),
                });
                self.push_frame(CallFrame {
                    code: Rc::clone(code),
                    pc: binding.pc,
                    stack: Vec::new(),
                    self_value: receiver.clone(),
                    env,
                    handler_cont: None,
                    kw_passed: binding.kw_passed,
                })?;
                Ok(Invoke::Pushed)
            }
            MethodDef::Proc(body) => self.invoke_proc(
                body,
                args,
                block,
                BlockCall {
                    self_value: Some(receiver.clone()),
                    lexical: None,
                    method: Some(MethodInfo {
                        name: entry.name.clone(),
                        owner: entry.owner,
                    }),
                    lambda: true,
                },
            ),
            MethodDef::AttrReader(ivar) => {
                if !args.is_empty() {
                    return Err(self.arity_error(args.len(), "0"));
                }
                Ok(Invoke::Done(self.ivar_get(receiver, ivar.as_str())))
            }
            MethodDef::AttrWriter(ivar) => {
                let given = args.len();
                let mut args = args.into_iter();
                match (args.next(), given) {
                    (Some(value), 1) => {
                        self.ivar_set(receiver, ivar.clone(), value.clone())?;
                        Ok(Invoke::Done(value))
                    }
                    _ => Err(self.arity_error(given, "1")),
                }
            }
            MethodDef::Alias(target) => self.invoke_method(target, receiver, args, block),
            MethodDef::Undefined => Err(self.no_method_error(receiver, entry.name.as_str())),
        }
    }

    /// Start a closure. Non-lambda closures spread a lone array argument
    /// across several parameters and tolerate missing or extra arguments.
    pub fn invoke_proc(
        &mut self,
        proc: &Rc<Proc>,
        mut args: Vec<Value>,
        block: Option<Rc<Proc>>,
        call: BlockCall,
    ) -> VmResult<Invoke> {
        match &proc.body {
            ProcBody::Symbol(name) => {
                if args.is_empty() {
                    return Err(self.raise_error(ClassId::ARGUMENT_ERROR, "no receiver given"));
                }
                let receiver = args.remove(0);
                self.dispatch(&receiver, name.as_str(), args, block, false)
            }
            ProcBody::Block {
                code,
                env,
                self_value,
            } => {
                let lambda = proc.lambda || call.lambda;
                let binding = self.bind_args(code, args, block.as_ref(), lambda)?;
                let block_env = Rc::new(Env {
                    locals: RefCell::new(binding.locals),
                    prev: Some(Rc::clone(env)),
                    lexical: call.lexical.unwrap_or_else(|| Rc::clone(&env.lexical)),
                    code: Rc::clone(code),
                    block,
                    method: call.method,
                    lambda,
                    visibility: Cell::new(Visibility::Public),
                });
                self.push_frame(CallFrame {
                    code: Rc::clone(code),
                    pc: binding.pc,
                    stack: Vec::new(),
                    self_value: call.self_value.unwrap_or_else(|| self_value.clone()),
                    env: block_env,
                    handler_cont: None,
                    kw_passed: binding.kw_passed,
                })?;
                Ok(Invoke::Pushed)
            }
        }
    }

    // ===== Re-entrant calls =====

    /// Call a method from builtin or host code and wait for its value.
    /// Private methods are reachable, as with an implicit receiver.
    pub fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        block: Option<Rc<Proc>>,
    ) -> VmResult<Value> {
        let invoke = self.dispatch(receiver, name, args, block, true)?;
        self.complete(invoke)
    }

    pub fn call_block(&mut self, block: &Rc<Proc>, args: Vec<Value>) -> VmResult<Value> {
        self.call_block_with(block, args, None, BlockCall::default())
    }

    pub fn call_block_with(
        &mut self,
        block: &Rc<Proc>,
        args: Vec<Value>,
        passed: Option<Rc<Proc>>,
        call: BlockCall,
    ) -> VmResult<Value> {
        let invoke = self.invoke_proc(block, args, passed, call)?;
        self.complete(invoke)
    }

    fn complete(&mut self, invoke: Invoke) -> VmResult<Value> {
        match invoke {
            Invoke::Done(value) => Ok(value),
            Invoke::Pushed => {
                let base = self.frames.len().saturating_sub(1);
                self.run(base)
            }
        }
    }

    pub fn respond_to(&mut self, value: &Value, name: &str, include_private: bool) -> bool {
        let class = self.class_of(value);
        self.classes
            .find_method(class, name)
            .map_or(false, |entry| include_private || entry.visibility == Visibility::Public)
    }

    // ===== Argument binding =====

    fn arity_error(&mut self, given: usize, expected: &str) -> super::Control {
        self.raise_error(
            ClassId::ARGUMENT_ERROR,
            format!(
                "wrong number of arguments (given {}, expected {})",
                given, expected
            ),
        )
    }

    /// Lay out arguments in the callee's local slots. `strict` (methods and
    /// lambdas) rejects a wrong positional count; otherwise missing values
    /// are nil and extras are dropped.
    fn bind_args(
        &mut self,
        code: &Rc<CodeObject>,
        mut args: Vec<Value>,
        block: Option<&Rc<Proc>>,
        strict: bool,
    ) -> VmResult<Binding> {
        let params = &code.params;
        let mut locals = vec![Value::Nil; code.locals.len()];
        let mut kw_passed = vec![false; params.keywords.len()];

        let keywords = if !params.keywords.is_empty() && args.len() > params.required {
            match args.last() {
                Some(Value::Hash(table)) if table.borrow().all_symbol_keys() => {
                    let entries = table.borrow().entries();
                    args.pop();
                    Some(entries)
                }
                _ => None,
            }
        } else {
            None
        };

        if !strict && args.len() == 1 && params.lead_count() > 1 {
            if let Value::Array(items) = &args[0] {
                let spread = items.borrow().clone();
                args = spread;
            }
        }

        let required = params.required;
        let optional = params.optional;
        let given = args.len();
        if strict && (given < required || (params.rest.is_none() && given > required + optional)) {
            let expected = if params.rest.is_some() {
                format!("{}+", required)
            } else if optional > 0 {
                format!("{}..{}", required, required + optional)
            } else {
                required.to_string()
            };
            return Err(self.arity_error(given, &expected));
        }

        let opt_given = given.saturating_sub(required).min(optional);
        let mut positional = args.into_iter();
        for local in locals.iter_mut().take(required + opt_given) {
            match positional.next() {
                Some(value) => *local = value,
                None => break,
            }
        }
        if let Some(slot) = params.rest {
            if let Some(local) = locals.get_mut(slot) {
                *local = Value::array(positional.collect());
            }
        }

        let mut supplied = keywords.unwrap_or_default();
        let mut missing = Vec::new();
        for (index, keyword) in params.keywords.iter().enumerate() {
            let found = supplied
                .iter()
                .position(|(key, _)| matches!(key, Value::Symbol(s) if *s == keyword.name));
            match found {
                Some(at) => {
                    let (_, value) = supplied.remove(at);
                    if let Some(local) = locals.get_mut(keyword.slot) {
                        *local = value;
                    }
                    kw_passed[index] = true;
                }
                None if keyword.required => missing.push(format!(":{}", keyword.name)),
                None => {}
            }
        }
        if !missing.is_empty() {
            let noun = if missing.len() == 1 { "keyword" } else { "keywords" };
            return Err(self.raise_error(
                ClassId::ARGUMENT_ERROR,
                format!("missing {}: {}", noun, missing.join(", ")),
            ));
        }
        if let Some((key, _)) = supplied.first() {
            let key = crate::stdlib::plain_inspect(&self.classes, key);
            return Err(self.raise_error(
                ClassId::ARGUMENT_ERROR,
                format!("unknown keyword: {}", key),
            ));
        }

        if let Some(slot) = params.block {
            if let Some(local) = locals.get_mut(slot) {
                *local = block.map_or(Value::Nil, |b| Value::Proc(Rc::clone(b)));
            }
        }

        Ok(Binding {
            locals,
            pc: params.opt_entries.get(opt_given).copied().unwrap_or(0),
            kw_passed,
        })
    }
}

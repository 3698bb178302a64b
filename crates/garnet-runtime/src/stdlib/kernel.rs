//! `Kernel` and `BasicObject`: methods every object responds to

use super::{
    class_name, define, define_private, expect_name, inspect, plain_inspect, require_block, to_s,
    write_output,
};
use crate::object::{Arity, ClassId};
use crate::symbol::Symbol;
use crate::value::{Proc, ProcBody, Value};
use crate::vm::{BlockCall, Control, LexicalScope, Signal, UnwindReason, Vm, VmResult};
use std::rc::Rc;

pub(super) fn install(vm: &mut Vm) {
    let k = ClassId::KERNEL;

    // Functions: callable only without a receiver
    define_private(vm, k, "puts", Arity::at_least(0), puts);
    define_private(vm, k, "print", Arity::at_least(0), print);
    define_private(vm, k, "p", Arity::at_least(0), p);
    define_private(vm, k, "raise", Arity::range(0, 2), raise);
    define_private(vm, k, "lambda", Arity::exactly(0), lambda);
    define_private(vm, k, "proc", Arity::exactly(0), proc);
    define_private(vm, k, "block_given?", Arity::exactly(0), block_given);
    define_private(vm, k, "loop", Arity::exactly(0), kernel_loop);
    define_private(vm, k, "method_missing", Arity::at_least(0), method_missing);

    // Object protocol
    define(vm, k, "==", Arity::exactly(1), equal);
    define(vm, k, "equal?", Arity::exactly(1), equal);
    define(vm, k, "eql?", Arity::exactly(1), equal);
    define(vm, k, "!=", Arity::exactly(1), not_equal);
    define(vm, k, "!", Arity::exactly(0), not);
    define(vm, k, "===", Arity::exactly(1), case_equal);
    define(vm, k, "hash", Arity::exactly(0), hash);
    define(vm, k, "object_id", Arity::exactly(0), hash);
    define(vm, k, "class", Arity::exactly(0), class);
    define(vm, k, "is_a?", Arity::exactly(1), is_a);
    define(vm, k, "kind_of?", Arity::exactly(1), is_a);
    define(vm, k, "instance_of?", Arity::exactly(1), instance_of);
    define(vm, k, "respond_to?", Arity::range(1, 2), respond_to);
    define(vm, k, "nil?", Arity::exactly(0), is_nil);
    define(vm, k, "to_s", Arity::exactly(0), object_to_s);
    define(vm, k, "inspect", Arity::exactly(0), object_inspect);
    define(vm, k, "send", Arity::at_least(1), send);
    define(vm, k, "__send__", Arity::at_least(1), send);
    define(vm, k, "instance_variable_get", Arity::exactly(1), ivar_get);
    define(vm, k, "instance_variable_set", Arity::exactly(2), ivar_set);
    define(vm, k, "instance_variables", Arity::exactly(0), ivar_names);
    define(vm, k, "extend", Arity::at_least(1), extend);
    define(vm, k, "singleton_class", Arity::exactly(0), singleton_class);
    define(vm, k, "instance_eval", Arity::exactly(0), instance_eval);
    define(vm, k, "freeze", Arity::exactly(0), freeze);
    define(vm, k, "frozen?", Arity::exactly(0), frozen);

    define_private(vm, ClassId::BASIC_OBJECT, "initialize", Arity::exactly(0), initialize);
    define(vm, ClassId::NIL_CLASS, "to_a", Arity::exactly(0), nil_to_a);
}

// ============================================================================
// Output
// ============================================================================

fn puts(vm: &mut Vm, _recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut lines = Vec::new();
    if args.is_empty() {
        lines.push(String::new());
    }
    for arg in args {
        collect_lines(vm, arg, &mut lines)?;
    }
    let mut text = String::new();
    for line in lines {
        text.push_str(&line);
        if !line.ends_with('\n') {
            text.push('\n');
        }
    }
    write_output(vm, &text)?;
    Ok(Value::Nil)
}

/// Arrays print one element per line, recursively
fn collect_lines(vm: &mut Vm, value: &Value, lines: &mut Vec<String>) -> VmResult<()> {
    match value {
        Value::Array(items) => {
            let items = items.borrow().clone();
            if items.is_empty() {
                lines.push(String::new());
            }
            for item in &items {
                collect_lines(vm, item, lines)?;
            }
        }
        other => lines.push(to_s(vm, other)?),
    }
    Ok(())
}

fn print(vm: &mut Vm, _recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut text = String::new();
    for arg in args {
        text.push_str(&to_s(vm, arg)?);
    }
    write_output(vm, &text)?;
    Ok(Value::Nil)
}

fn p(vm: &mut Vm, _recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut text = String::new();
    for arg in args {
        text.push_str(&inspect(vm, arg)?);
        text.push('\n');
    }
    write_output(vm, &text)?;
    Ok(match args {
        [] => Value::Nil,
        [single] => single.clone(),
        many => Value::array(many.to_vec()),
    })
}

// ============================================================================
// Control
// ============================================================================

/// `raise`, `raise "msg"`, `raise Cls`, `raise Cls, "msg"`, `raise exc`
fn raise(vm: &mut Vm, _recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let exception = match args {
        [] => match vm.errinfo().clone() {
            Value::Nil => vm.new_exception(ClassId::RUNTIME_ERROR, "unhandled exception".to_string()),
            current => current,
        },
        [Value::String(message)] => {
            let message = message.borrow().clone();
            vm.new_exception(ClassId::RUNTIME_ERROR, message)
        }
        [source, rest @ ..] => {
            if !vm.respond_to(source, "exception", true) {
                return Err(
                    vm.raise_error(ClassId::TYPE_ERROR, "exception class/object expected")
                );
            }
            vm.call_method(source, "exception", rest.to_vec(), None)?
        }
    };
    if !vm.kind_of(&exception, ClassId::EXCEPTION) {
        return Err(vm.raise_error(ClassId::TYPE_ERROR, "exception object expected"));
    }
    vm.attach_backtrace(&exception);
    Err(Signal::raise(exception).into())
}

fn lambda(vm: &mut Vm, _recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    match block {
        Some(block) => Ok(Value::Proc(block.to_lambda())),
        None => Err(vm.raise_error(
            ClassId::ARGUMENT_ERROR,
            "tried to create Proc object without a block",
        )),
    }
}

fn proc(vm: &mut Vm, _recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    match block {
        Some(block) => Ok(Value::Proc(Rc::clone(block))),
        None => Err(vm.raise_error(
            ClassId::ARGUMENT_ERROR,
            "tried to create Proc object without a block",
        )),
    }
}

/// Whether the method that called `block_given?` received a block
fn block_given(vm: &mut Vm, _recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let given = vm
        .frames()
        .last()
        .map_or(false, |frame| frame.env.home().block.is_some());
    Ok(Value::bool(given))
}

/// Run the block until it breaks or raises `StopIteration`
fn kernel_loop(vm: &mut Vm, _recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    loop {
        match vm.call_block(block, Vec::new()) {
            Ok(_) => {}
            Err(Control::Unwind(signal))
                if signal.reason == UnwindReason::Raise
                    && vm.kind_of(&signal.value, ClassId::STOP_ITERATION) =>
            {
                return Ok(Value::Nil)
            }
            Err(other) => return Err(other),
        }
    }
}

fn method_missing(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    match args.first() {
        Some(Value::Symbol(name)) => Err(vm.no_method_error(recv, name.as_str())),
        _ => Err(vm.raise_error(ClassId::ARGUMENT_ERROR, "no method name given")),
    }
}

fn send(vm: &mut Vm, recv: &Value, args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let name = expect_name(vm, &args[0])?;
    vm.call_method(recv, name.as_str(), args[1..].to_vec(), block.cloned())
}

// ============================================================================
// Identity and equality
// ============================================================================

fn equal(_vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(recv.identical(&args[0])))
}

fn not_equal(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let equal = vm.call_method(recv, "==", vec![args[0].clone()], None)?;
    Ok(Value::bool(!equal.is_truthy()))
}

fn not(_vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(!recv.is_truthy()))
}

fn case_equal(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    if recv.identical(&args[0]) {
        return Ok(Value::True);
    }
    let equal = vm.call_method(recv, "==", vec![args[0].clone()], None)?;
    Ok(Value::bool(equal.is_truthy()))
}

fn hash(_vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::Integer(recv.identity() as i64))
}

// ============================================================================
// Classes
// ============================================================================

fn class(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::Class(vm.real_class_of(recv)))
}

fn is_a(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(&args[0])?;
    Ok(Value::bool(vm.kind_of(recv, class)))
}

fn instance_of(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(&args[0])?;
    Ok(Value::bool(vm.real_class_of(recv) == class))
}

fn respond_to(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let name = expect_name(vm, &args[0])?;
    let include_private = args.get(1).map_or(false, Value::is_truthy);
    Ok(Value::bool(vm.respond_to(recv, name.as_str(), include_private)))
}

fn is_nil(_vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(recv.is_nil()))
}

fn extend(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let singleton = vm.singleton_class_of(recv)?;
    for module in args.iter().rev() {
        let module = super::module::expect_mixin(vm, module)?;
        vm.classes.include_module(singleton, module);
    }
    Ok(recv.clone())
}

fn singleton_class(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::Class(vm.singleton_class_of(recv)?))
}

/// Run the block with `self` rebound; `def` inside it defines singleton
/// methods on objects and classes
fn instance_eval(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    let lexical = match (recv, &block.body) {
        (Value::Object(_) | Value::Class(_), ProcBody::Block { env, .. }) => {
            let singleton = vm.singleton_class_of(recv)?;
            Some(LexicalScope::nested(&env.lexical, singleton))
        }
        _ => None,
    };
    vm.call_block_with(
        block,
        vec![recv.clone()],
        None,
        BlockCall {
            self_value: Some(recv.clone()),
            lexical,
            ..BlockCall::default()
        },
    )
}

fn freeze(_vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(recv.clone())
}

fn frozen(_vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(!matches!(
        recv,
        Value::String(_) | Value::Array(_) | Value::Hash(_) | Value::Object(_) | Value::Class(_)
    )))
}

// ============================================================================
// Instance variables
// ============================================================================

fn ivar_name(vm: &mut Vm, value: &Value) -> VmResult<Symbol> {
    let name = expect_name(vm, value)?;
    if !name.as_str().starts_with('@') || name.as_str().starts_with("@@") {
        return Err(vm.raise_error(
            ClassId::NAME_ERROR,
            format!("'{}' is not allowed as an instance variable name", name),
        ));
    }
    Ok(name)
}

fn ivar_get(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let name = ivar_name(vm, &args[0])?;
    Ok(vm.ivar_get(recv, name.as_str()))
}

fn ivar_set(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let name = ivar_name(vm, &args[0])?;
    vm.ivar_set(recv, name, args[1].clone())?;
    Ok(args[1].clone())
}

/// Guest-visible instance variable names, sorted; internal slots are hidden
pub(crate) fn visible_ivars(recv: &Value) -> Vec<(Symbol, Value)> {
    let mut ivars: Vec<(Symbol, Value)> = match recv {
        Value::Object(object) => object
            .ivars
            .borrow()
            .iter()
            .filter(|(name, _)| name.as_str().starts_with('@'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        _ => Vec::new(),
    };
    ivars.sort_by(|a, b| a.0.cmp(&b.0));
    ivars
}

fn ivar_names(_vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let names = visible_ivars(recv)
        .into_iter()
        .map(|(name, _)| Value::Symbol(name))
        .collect();
    Ok(Value::array(names))
}

// ============================================================================
// Text
// ============================================================================

fn object_to_s(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    if recv.identical(vm.main_object()) {
        return Ok(Value::string("main"));
    }
    match recv {
        Value::Object(_) => Ok(Value::string(format!("#<{}>", class_name(vm, recv)))),
        other => Ok(Value::string(super::plain_to_s(&vm.classes, other))),
    }
}

/// `#<Foo @a=1, @b="x">`
fn object_inspect(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    if recv.identical(vm.main_object()) {
        return Ok(Value::string("main"));
    }
    if !matches!(recv, Value::Object(_)) {
        return Ok(Value::string(plain_inspect(&vm.classes, recv)));
    }
    let class = class_name(vm, recv);
    let ivars = visible_ivars(recv);
    if ivars.is_empty() {
        return Ok(Value::string(format!("#<{}>", class)));
    }
    let mut parts = Vec::with_capacity(ivars.len());
    for (name, value) in &ivars {
        parts.push(format!("{}={}", name, inspect(vm, value)?));
    }
    Ok(Value::string(format!("#<{} {}>", class, parts.join(", "))))
}

fn nil_to_a(_vm: &mut Vm, _recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::array(Vec::new()))
}

fn initialize(_vm: &mut Vm, _recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::Nil)
}

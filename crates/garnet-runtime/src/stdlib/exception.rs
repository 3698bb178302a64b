//! `Exception` and its builtin subclasses
//!
//! The message and backtrace live in hidden instance variables so that
//! exceptions raised by the VM and ones built by guest code look the same.

use super::{class_name, define, define_singleton, to_s};
use crate::object::{Arity, ClassId};
use crate::symbol::Symbol;
use crate::value::{Proc, RObject, Value};
use crate::vm::{Vm, VmResult};
use std::rc::Rc;

const MESSAGE: &str = "__message";
const BACKTRACE: &str = "__backtrace";

pub(super) fn install(vm: &mut Vm) {
    let e = ClassId::EXCEPTION;
    super::define_private(vm, e, "initialize", Arity::range(0, 1), initialize);
    define(vm, e, "message", Arity::exactly(0), message);
    define(vm, e, "to_s", Arity::exactly(0), to_s_method);
    define(vm, e, "inspect", Arity::exactly(0), inspect);
    define(vm, e, "backtrace", Arity::exactly(0), backtrace);
    define(vm, e, "full_message", Arity::exactly(0), full_message);
    define(vm, e, "exception", Arity::range(0, 1), exception);
    define(vm, e, "==", Arity::exactly(1), equal);
    define_singleton(vm, e, "exception", Arity::at_least(0), class_exception);
}

fn object_of(vm: &mut Vm, recv: &Value) -> VmResult<Rc<RObject>> {
    match recv {
        Value::Object(object) => Ok(Rc::clone(object)),
        other => {
            let shown = class_name(vm, other);
            Err(vm.raise_error(ClassId::TYPE_ERROR, format!("{} is not an exception", shown)))
        }
    }
}

fn initialize(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let object = object_of(vm, recv)?;
    object.set_ivar(Symbol::new(MESSAGE), args.first().cloned().unwrap_or(Value::Nil));
    Ok(Value::Nil)
}

/// `message` is whatever `to_s` says, so subclasses override `to_s`
fn message(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    vm.call_method(recv, "to_s", Vec::new(), None)
}

/// The stored message, or the class name when there is none
fn to_s_method(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let object = object_of(vm, recv)?;
    match object.ivar(MESSAGE) {
        Value::Nil => Ok(Value::string(class_name(vm, recv))),
        Value::String(text) => Ok(Value::String(text)),
        other => Ok(Value::string(to_s(vm, &other)?)),
    }
}

fn message_text(vm: &mut Vm, recv: &Value) -> VmResult<String> {
    let message = vm.call_method(recv, "message", Vec::new(), None)?;
    to_s(vm, &message)
}

/// `#<RuntimeError: boom>`; just the class name for an empty message
fn inspect(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = class_name(vm, recv);
    let text = message_text(vm, recv)?;
    Ok(Value::string(if text.is_empty() {
        class
    } else {
        format!("#<{}: {}>", class, text)
    }))
}

fn backtrace(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(object_of(vm, recv)?.ivar(BACKTRACE))
}

/// `file:line:in 'm': message (Class)` followed by the remaining frames
fn full_message(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let object = object_of(vm, recv)?;
    let class = class_name(vm, recv);
    let text = message_text(vm, recv)?;
    let lines: Vec<String> = match object.ivar(BACKTRACE) {
        Value::Array(lines) => lines
            .borrow()
            .iter()
            .map(|line| super::plain_to_s(&vm.classes, line))
            .collect(),
        _ => Vec::new(),
    };
    let mut out = match lines.first() {
        Some(origin) => format!("{}: {} ({})", origin, text, class),
        None => format!("{} ({})", text, class),
    };
    for line in lines.iter().skip(1) {
        out.push_str("\n\tfrom ");
        out.push_str(line);
    }
    Ok(Value::string(out))
}

/// Without an argument the receiver itself; with one, a copy carrying
/// the new message
fn exception(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let Some(message) = args.first() else {
        return Ok(recv.clone());
    };
    let original = object_of(vm, recv)?;
    let copy = RObject::new(original.class.get());
    *copy.ivars.borrow_mut() = original.ivars.borrow().clone();
    copy.set_ivar(Symbol::new(MESSAGE), message.clone());
    copy.ivars.borrow_mut().remove(BACKTRACE);
    Ok(Value::Object(copy))
}

fn equal(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    if recv.identical(&args[0]) {
        return Ok(Value::True);
    }
    let same_class = vm.real_class_of(recv) == vm.real_class_of(&args[0]);
    if !same_class || !matches!(args[0], Value::Object(_)) {
        return Ok(Value::False);
    }
    let left = message_text(vm, recv)?;
    let right = message_text(vm, &args[0])?;
    Ok(Value::bool(left == right))
}

/// `SomeError.exception(msg)` is `SomeError.new(msg)`
fn class_exception(vm: &mut Vm, recv: &Value, args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    vm.call_method(recv, "new", args.to_vec(), block.cloned())
}

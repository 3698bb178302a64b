//! `Proc`

use super::define;
use crate::object::{Arity, ClassId};
use crate::value::{Proc, ProcBody, Value};
use crate::vm::{BlockCall, Vm, VmResult};
use std::rc::Rc;

pub(super) fn install(vm: &mut Vm) {
    let p = ClassId::PROC;
    define(vm, p, "call", Arity::at_least(0), call);
    define(vm, p, "()", Arity::at_least(0), call);
    define(vm, p, "yield", Arity::at_least(0), call);
    define(vm, p, "[]", Arity::at_least(0), call);
    define(vm, p, "===", Arity::at_least(0), call);
    define(vm, p, "to_proc", Arity::exactly(0), to_proc);
    define(vm, p, "arity", Arity::exactly(0), arity);
    define(vm, p, "lambda?", Arity::exactly(0), is_lambda);
    define(vm, p, "inspect", Arity::exactly(0), inspect);
    define(vm, p, "to_s", Arity::exactly(0), inspect);
}

/// `#<Proc:0x... file:line (lambda)>`
pub fn proc_inspect(proc: &Rc<Proc>, identity: u64) -> String {
    let origin = match &proc.body {
        ProcBody::Block { code, .. } => format!(" {}:{}", code.file, code.line),
        ProcBody::Symbol(name) => format!("(&{})", super::string::symbol_inspect(name.as_str())),
    };
    let lambda = if proc.lambda { " (lambda)" } else { "" };
    format!("#<Proc:0x{:016x}{}{}>", identity, origin, lambda)
}

fn proc_of(vm: &mut Vm, recv: &Value) -> VmResult<Rc<Proc>> {
    match recv {
        Value::Proc(proc) => Ok(Rc::clone(proc)),
        other => Err(super::conversion_error(vm, other, "Proc")),
    }
}

/// Runs with the semantics the proc was created with: a lambda checks
/// arity and `return` leaves only the lambda
fn call(vm: &mut Vm, recv: &Value, args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let proc = proc_of(vm, recv)?;
    vm.call_block_with(&proc, args.to_vec(), block.cloned(), BlockCall::default())
}

fn to_proc(_vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(recv.clone())
}

fn arity(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let proc = proc_of(vm, recv)?;
    Ok(Value::Integer(proc.arity()))
}

fn is_lambda(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(proc_of(vm, recv)?.lambda))
}

fn inspect(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let proc = proc_of(vm, recv)?;
    Ok(Value::string(proc_inspect(&proc, recv.identity())))
}

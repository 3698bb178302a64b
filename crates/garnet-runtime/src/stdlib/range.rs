//! `Range`

use super::{define, inspect, require_block, to_s, values_equal};
use crate::object::{Arity, ClassId};
use crate::value::{Proc, RangeData, Value};
use crate::vm::{Vm, VmResult};
use std::rc::Rc;

pub(super) fn install(vm: &mut Vm) {
    let r = ClassId::RANGE;
    define(vm, r, "each", Arity::exactly(0), each);
    define(vm, r, "map", Arity::exactly(0), map);
    define(vm, r, "to_a", Arity::exactly(0), to_a);
    define(vm, r, "include?", Arity::exactly(1), includes);
    define(vm, r, "member?", Arity::exactly(1), includes);
    define(vm, r, "===", Arity::exactly(1), includes);
    define(vm, r, "first", Arity::range(0, 1), first);
    define(vm, r, "begin", Arity::exactly(0), begin);
    define(vm, r, "last", Arity::exactly(0), last);
    define(vm, r, "end", Arity::exactly(0), end);
    define(vm, r, "exclude_end?", Arity::exactly(0), exclude_end);
    define(vm, r, "size", Arity::exactly(0), size);
    define(vm, r, "==", Arity::exactly(1), equal);
    define(vm, r, "inspect", Arity::exactly(0), inspect_method);
    define(vm, r, "to_s", Arity::exactly(0), to_s_method);
}

fn range_of(vm: &mut Vm, recv: &Value) -> VmResult<Rc<RangeData>> {
    match recv {
        Value::Range(range) => Ok(Rc::clone(range)),
        other => Err(super::conversion_error(vm, other, "Range")),
    }
}

/// Inclusive integer bounds, or TypeError for ranges that cannot be walked
fn bounds(vm: &mut Vm, range: &RangeData) -> VmResult<(i64, i64)> {
    match range.int_bounds() {
        Some(bounds) => Ok(bounds),
        None => {
            let class = super::class_name(vm, &range.start);
            Err(vm.raise_error(ClassId::TYPE_ERROR, format!("can't iterate from {}", class)))
        }
    }
}

fn each(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    let range = range_of(vm, recv)?;
    let (low, high) = bounds(vm, &range)?;
    for value in low..=high {
        vm.call_block(block, vec![Value::Integer(value)])?;
    }
    Ok(recv.clone())
}

fn map(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    let range = range_of(vm, recv)?;
    let (low, high) = bounds(vm, &range)?;
    let mut mapped = Vec::new();
    for value in low..=high {
        mapped.push(vm.call_block(block, vec![Value::Integer(value)])?);
    }
    Ok(Value::array(mapped))
}

fn to_a(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let range = range_of(vm, recv)?;
    let (low, high) = bounds(vm, &range)?;
    Ok(Value::array((low..=high).map(Value::Integer).collect()))
}

/// Ordered comparison through `<=>`; None when the values are unordered
fn order(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<Option<i64>> {
    match vm.call_method(a, "<=>", vec![b.clone()], None)? {
        Value::Integer(n) => Ok(Some(n)),
        _ => Ok(None),
    }
}

/// `start <= value` and `value < end` (or `<=` for inclusive ranges)
fn includes(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let range = range_of(vm, recv)?;
    let value = &args[0];
    let above_start = match order(vm, &range.start, value)? {
        Some(n) => n <= 0,
        None => false,
    };
    if !above_start {
        return Ok(Value::False);
    }
    let below_end = match order(vm, value, &range.end)? {
        Some(n) if range.exclusive => n < 0,
        Some(n) => n <= 0,
        None => false,
    };
    Ok(Value::bool(below_end))
}

fn first(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let range = range_of(vm, recv)?;
    let Some(count) = args.first() else {
        return Ok(range.start.clone());
    };
    let count = super::expect_integer(vm, count)?;
    if count < 0 {
        return Err(vm.raise_error(ClassId::ARGUMENT_ERROR, "negative array size (or size too big)"));
    }
    let (low, high) = bounds(vm, &range)?;
    let taken = (low..=high).take(count as usize).map(Value::Integer).collect();
    Ok(Value::array(taken))
}

fn begin(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(range_of(vm, recv)?.start.clone())
}

fn end(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(range_of(vm, recv)?.end.clone())
}

/// Last element reached by iteration: `(1...5).last` is 4
fn last(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let range = range_of(vm, recv)?;
    match range.int_bounds() {
        Some((_, high)) => Ok(Value::Integer(high)),
        None => Ok(range.end.clone()),
    }
}

fn exclude_end(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(range_of(vm, recv)?.exclusive))
}

fn size(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let range = range_of(vm, recv)?;
    Ok(match range.int_bounds() {
        Some((low, high)) => Value::Integer((high - low + 1).max(0)),
        None => Value::Nil,
    })
}

fn equal(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let range = range_of(vm, recv)?;
    let Value::Range(other) = &args[0] else {
        return Ok(Value::False);
    };
    let same = range.exclusive == other.exclusive
        && values_equal(vm, &range.start, &other.start)?
        && values_equal(vm, &range.end, &other.end)?;
    Ok(Value::bool(same))
}

fn render(vm: &mut Vm, recv: &Value, text: fn(&mut Vm, &Value) -> VmResult<String>) -> VmResult<Value> {
    let range = range_of(vm, recv)?;
    let start = text(vm, &range.start)?;
    let end = text(vm, &range.end)?;
    let dots = if range.exclusive { "..." } else { ".." };
    Ok(Value::string(format!("{}{}{}", start, dots, end)))
}

fn inspect_method(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    render(vm, recv, inspect)
}

fn to_s_method(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    render(vm, recv, to_s)
}

//! `Array`
//!
//! Iterating methods index into the vector afresh on every step and never
//! keep a borrow while the block runs, so a block may push to or pop from
//! the array it is walking.

use super::{define, expect_integer, inspect, require_block, to_s, values_equal};
use crate::object::{Arity, ClassId};
use crate::value::{Proc, Value};
use crate::vm::{Vm, VmResult};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

type Items = Rc<RefCell<Vec<Value>>>;

pub(super) fn install(vm: &mut Vm) {
    let a = ClassId::ARRAY;
    define(vm, a, "[]", Arity::range(1, 2), index);
    define(vm, a, "[]=", Arity::exactly(2), set_index);
    define(vm, a, "<<", Arity::exactly(1), append);
    define(vm, a, "push", Arity::at_least(0), push);
    define(vm, a, "pop", Arity::exactly(0), pop);
    define(vm, a, "shift", Arity::exactly(0), shift);
    define(vm, a, "unshift", Arity::at_least(0), unshift);
    define(vm, a, "size", Arity::exactly(0), size);
    define(vm, a, "length", Arity::exactly(0), size);
    define(vm, a, "empty?", Arity::exactly(0), is_empty);
    define(vm, a, "first", Arity::range(0, 1), first);
    define(vm, a, "last", Arity::range(0, 1), last);
    define(vm, a, "include?", Arity::exactly(1), includes);
    define(vm, a, "index", Arity::exactly(1), position);
    define(vm, a, "each", Arity::exactly(0), each);
    define(vm, a, "each_with_index", Arity::exactly(0), each_with_index);
    define(vm, a, "map", Arity::exactly(0), map);
    define(vm, a, "collect", Arity::exactly(0), map);
    define(vm, a, "select", Arity::exactly(0), select);
    define(vm, a, "filter", Arity::exactly(0), select);
    define(vm, a, "reject", Arity::exactly(0), reject);
    define(vm, a, "find", Arity::exactly(0), find);
    define(vm, a, "any?", Arity::exactly(0), any);
    define(vm, a, "all?", Arity::exactly(0), all);
    define(vm, a, "count", Arity::exactly(0), size);
    define(vm, a, "inject", Arity::range(0, 2), inject);
    define(vm, a, "reduce", Arity::range(0, 2), inject);
    define(vm, a, "sum", Arity::exactly(0), sum);
    define(vm, a, "min", Arity::exactly(0), min);
    define(vm, a, "max", Arity::exactly(0), max);
    define(vm, a, "sort", Arity::exactly(0), sort);
    define(vm, a, "reverse", Arity::exactly(0), reverse);
    define(vm, a, "compact", Arity::exactly(0), compact);
    define(vm, a, "uniq", Arity::exactly(0), uniq);
    define(vm, a, "join", Arity::range(0, 1), join);
    define(vm, a, "+", Arity::exactly(1), concat);
    define(vm, a, "==", Arity::exactly(1), equal);
    define(vm, a, "eql?", Arity::exactly(1), eql);
    define(vm, a, "hash", Arity::exactly(0), hash);
    define(vm, a, "dup", Arity::exactly(0), dup);
    define(vm, a, "to_a", Arity::exactly(0), to_a);
    define(vm, a, "inspect", Arity::exactly(0), inspect_method);
    define(vm, a, "to_s", Arity::exactly(0), inspect_method);
}

fn items_of(vm: &mut Vm, recv: &Value) -> VmResult<Items> {
    match recv {
        Value::Array(items) => Ok(Rc::clone(items)),
        other => Err(super::conversion_error(vm, other, "Array")),
    }
}

fn snapshot(vm: &mut Vm, recv: &Value) -> VmResult<Vec<Value>> {
    Ok(items_of(vm, recv)?.borrow().clone())
}

fn item_at(items: &Items, index: usize) -> Option<Value> {
    items.borrow().get(index).cloned()
}

/// Visit elements in order until the array ends; `visit` returns false to stop
fn walk(
    vm: &mut Vm,
    recv: &Value,
    mut visit: impl FnMut(&mut Vm, usize, Value) -> VmResult<bool>,
) -> VmResult<()> {
    let items = items_of(vm, recv)?;
    let mut index = 0;
    while let Some(item) = item_at(&items, index) {
        if !visit(vm, index, item)? {
            break;
        }
        index += 1;
    }
    Ok(())
}

/// Negative positions count from the end
fn normalize(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

// ============================================================================
// Element access
// ============================================================================

/// `a[i]`, `a[start, len]` and `a[range]`
fn index(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let items = snapshot(vm, recv)?;
    let len = items.len() as i64;
    let (start, count) = match args {
        [Value::Range(range)] => {
            let Some((low, high)) = range.int_bounds() else {
                return Err(super::conversion_error(vm, &range.start, "Integer"));
            };
            let low = if low < 0 { low + len } else { low };
            let high = if high < 0 { high + len } else { high };
            (low, (high - low + 1).max(0))
        }
        [position] => {
            let position = expect_integer(vm, position)?;
            return Ok(normalize(position, items.len())
                .map_or(Value::Nil, |i| items[i].clone()));
        }
        [start, count] => {
            let start = expect_integer(vm, start)?;
            let count = expect_integer(vm, count)?;
            if count < 0 {
                return Ok(Value::Nil);
            }
            (if start < 0 { start + len } else { start }, count)
        }
        _ => return Ok(Value::Nil),
    };
    if start < 0 || start > len {
        return Ok(Value::Nil);
    }
    let end = start.saturating_add(count).min(len);
    Ok(Value::array(items[start as usize..end as usize].to_vec()))
}

/// `a[i] = v`; writing past the end pads with nil
fn set_index(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let items = items_of(vm, recv)?;
    let position = expect_integer(vm, &args[0])?;
    let len = items.borrow().len() as i64;
    let target = if position < 0 { position + len } else { position };
    if target < 0 {
        return Err(vm.raise_error(
            ClassId::INDEX_ERROR,
            format!("index {} too small for array; minimum: -{}", position, len),
        ));
    }
    let target = target as usize;
    let mut items = items.borrow_mut();
    if target >= items.len() {
        items.resize(target + 1, Value::Nil);
    }
    items[target] = args[1].clone();
    Ok(args[1].clone())
}

fn append(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    items_of(vm, recv)?.borrow_mut().push(args[0].clone());
    Ok(recv.clone())
}

fn push(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    items_of(vm, recv)?.borrow_mut().extend(args.iter().cloned());
    Ok(recv.clone())
}

fn pop(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let popped = items_of(vm, recv)?.borrow_mut().pop();
    Ok(popped.unwrap_or(Value::Nil))
}

fn shift(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let items = items_of(vm, recv)?;
    let mut items = items.borrow_mut();
    Ok(if items.is_empty() { Value::Nil } else { items.remove(0) })
}

fn unshift(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let items = items_of(vm, recv)?;
    items.borrow_mut().splice(0..0, args.iter().cloned());
    Ok(recv.clone())
}

fn size(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let len = items_of(vm, recv)?.borrow().len();
    Ok(Value::Integer(len as i64))
}

fn is_empty(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let empty = items_of(vm, recv)?.borrow().is_empty();
    Ok(Value::bool(empty))
}

/// `first` or `first(n)`
fn first(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let items = snapshot(vm, recv)?;
    match args.first() {
        None => Ok(items.first().cloned().unwrap_or(Value::Nil)),
        Some(count) => {
            let count = take_count(vm, count)?.min(items.len());
            Ok(Value::array(items[..count].to_vec()))
        }
    }
}

fn last(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let items = snapshot(vm, recv)?;
    match args.first() {
        None => Ok(items.last().cloned().unwrap_or(Value::Nil)),
        Some(count) => {
            let count = take_count(vm, count)?.min(items.len());
            Ok(Value::array(items[items.len() - count..].to_vec()))
        }
    }
}

fn take_count(vm: &mut Vm, count: &Value) -> VmResult<usize> {
    let count = expect_integer(vm, count)?;
    if count < 0 {
        return Err(vm.raise_error(ClassId::ARGUMENT_ERROR, "negative array size"));
    }
    Ok(count as usize)
}

fn includes(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut found = false;
    walk(vm, recv, |vm, _, item| {
        found = values_equal(vm, &item, &args[0])?;
        Ok(!found)
    })?;
    Ok(Value::bool(found))
}

fn position(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut found = Value::Nil;
    walk(vm, recv, |vm, index, item| {
        if values_equal(vm, &item, &args[0])? {
            found = Value::Integer(index as i64);
            return Ok(false);
        }
        Ok(true)
    })?;
    Ok(found)
}

// ============================================================================
// Iteration
// ============================================================================

fn each(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    walk(vm, recv, |vm, _, item| {
        vm.call_block(block, vec![item])?;
        Ok(true)
    })?;
    Ok(recv.clone())
}

fn each_with_index(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    walk(vm, recv, |vm, index, item| {
        vm.call_block(block, vec![item, Value::Integer(index as i64)])?;
        Ok(true)
    })?;
    Ok(recv.clone())
}

fn map(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    let mut mapped = Vec::new();
    walk(vm, recv, |vm, _, item| {
        mapped.push(vm.call_block(block, vec![item])?);
        Ok(true)
    })?;
    Ok(Value::array(mapped))
}

fn filter_by(vm: &mut Vm, recv: &Value, block: Option<&Rc<Proc>>, keep: bool) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    let mut kept = Vec::new();
    walk(vm, recv, |vm, _, item| {
        if vm.call_block(block, vec![item.clone()])?.is_truthy() == keep {
            kept.push(item);
        }
        Ok(true)
    })?;
    Ok(Value::array(kept))
}

fn select(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    filter_by(vm, recv, block, true)
}

fn reject(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    filter_by(vm, recv, block, false)
}

fn find(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    let mut found = Value::Nil;
    walk(vm, recv, |vm, _, item| {
        if vm.call_block(block, vec![item.clone()])?.is_truthy() {
            found = item;
            return Ok(false);
        }
        Ok(true)
    })?;
    Ok(found)
}

/// Without a block, tests the elements themselves
fn any(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut result = false;
    walk(vm, recv, |vm, _, item| {
        let truthy = match block {
            Some(block) => vm.call_block(block, vec![item])?.is_truthy(),
            None => item.is_truthy(),
        };
        result = truthy;
        Ok(!truthy)
    })?;
    Ok(Value::bool(result))
}

fn all(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut result = true;
    walk(vm, recv, |vm, _, item| {
        let truthy = match block {
            Some(block) => vm.call_block(block, vec![item])?.is_truthy(),
            None => item.is_truthy(),
        };
        result = truthy;
        Ok(truthy)
    })?;
    Ok(Value::bool(result))
}

/// `inject { |acc, x| }`, `inject(init) { }`, `inject(:+)`, `inject(init, :+)`
fn inject(vm: &mut Vm, recv: &Value, args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let (initial, operator) = match (args, block) {
        ([], Some(_)) => (None, None),
        ([initial], Some(_)) => (Some(initial.clone()), None),
        ([Value::Symbol(op)], None) => (None, Some(op.clone())),
        ([initial, Value::Symbol(op)], None) => (Some(initial.clone()), Some(op.clone())),
        (_, None) => return Err(vm.raise_error(ClassId::LOCAL_JUMP_ERROR, "no block given")),
        (_, Some(_)) => {
            return Err(vm.raise_error(ClassId::ARGUMENT_ERROR, "wrong number of arguments"))
        }
    };
    let mut accumulator = initial;
    walk(vm, recv, |vm, _, item| {
        accumulator = Some(match accumulator.take() {
            None => item,
            Some(acc) => match (&operator, block) {
                (Some(op), _) => vm.call_method(&acc, op.as_str(), vec![item], None)?,
                (None, Some(block)) => vm.call_block(block, vec![acc, item])?,
                (None, None) => acc,
            },
        });
        Ok(true)
    })?;
    Ok(accumulator.unwrap_or(Value::Nil))
}

fn sum(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut total = Value::Integer(0);
    walk(vm, recv, |vm, _, item| {
        total = vm.call_method(&total, "+", vec![item], None)?;
        Ok(true)
    })?;
    Ok(total)
}

// ============================================================================
// Ordering
// ============================================================================

/// `<=>` for the common cases, guest `<=>` otherwise
fn compare(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<Ordering> {
    let ordering = match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.borrow().as_str().cmp(y.borrow().as_str())),
        _ => match vm.call_method(a, "<=>", vec![b.clone()], None)? {
            Value::Integer(n) => Some(n.cmp(&0)),
            _ => None,
        },
    };
    match ordering {
        Some(ordering) => Ok(ordering),
        None => {
            let left = super::class_name(vm, a);
            let right = inspect(vm, b)?;
            Err(vm.raise_error(
                ClassId::ARGUMENT_ERROR,
                format!("comparison of {} with {} failed", left, right),
            ))
        }
    }
}

fn compare_with(vm: &mut Vm, block: Option<&Rc<Proc>>, a: &Value, b: &Value) -> VmResult<Ordering> {
    match block {
        Some(block) => match vm.call_block(block, vec![a.clone(), b.clone()])? {
            Value::Integer(n) => Ok(n.cmp(&0)),
            other => {
                let shown = inspect(vm, &other)?;
                Err(vm.raise_error(
                    ClassId::ARGUMENT_ERROR,
                    format!("comparison of {} with 0 failed", shown),
                ))
            }
        },
        None => compare(vm, a, b),
    }
}

/// Stable merge sort with a fallible comparison
fn merge_sort(vm: &mut Vm, items: Vec<Value>, block: Option<&Rc<Proc>>) -> VmResult<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort(vm, left, block)?;
    let right = merge_sort(vm, right, block)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        if compare_with(vm, block, r, l)? == Ordering::Less {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

fn sort(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let items = snapshot(vm, recv)?;
    merge_sort(vm, items, block).map(Value::array)
}

fn extreme(vm: &mut Vm, recv: &Value, wanted: Ordering) -> VmResult<Value> {
    let mut best: Option<Value> = None;
    walk(vm, recv, |vm, _, item| {
        best = Some(match best.take() {
            Some(current) if compare(vm, &item, &current)? != wanted => current,
            _ => item,
        });
        Ok(true)
    })?;
    Ok(best.unwrap_or(Value::Nil))
}

fn min(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    extreme(vm, recv, Ordering::Less)
}

fn max(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    extreme(vm, recv, Ordering::Greater)
}

// ============================================================================
// Building new arrays
// ============================================================================

fn reverse(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut items = snapshot(vm, recv)?;
    items.reverse();
    Ok(Value::array(items))
}

fn compact(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let items = snapshot(vm, recv)?;
    Ok(Value::array(items.into_iter().filter(|item| !item.is_nil()).collect()))
}

/// First occurrence of each `eql?` element
fn uniq(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let items = snapshot(vm, recv)?;
    let seen = Rc::new(RefCell::new(crate::value::HashTable::new()));
    let mut unique = Vec::new();
    for item in items {
        if super::hash::hash_get(vm, &seen, &item)?.is_none() {
            super::hash::hash_set(vm, &seen, item.clone(), Value::True)?;
            unique.push(item);
        }
    }
    Ok(Value::array(unique))
}

fn concat(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut items = snapshot(vm, recv)?;
    items.extend(snapshot(vm, &args[0])?);
    Ok(Value::array(items))
}

fn dup(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    snapshot(vm, recv).map(Value::array)
}

fn to_a(_vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(recv.clone())
}

// ============================================================================
// Text and equality
// ============================================================================

/// Nested arrays are joined recursively; other elements through `to_s`
fn join_into(vm: &mut Vm, items: &[Value], out: &mut Vec<String>) -> VmResult<()> {
    for item in items {
        match item {
            Value::Array(nested) => {
                let nested = nested.borrow().clone();
                join_into(vm, &nested, out)?;
            }
            other => out.push(to_s(vm, other)?),
        }
    }
    Ok(())
}

fn join(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let items = snapshot(vm, recv)?;
    let separator = match args.first() {
        Some(Value::Nil) | None => String::new(),
        Some(separator) => super::expect_string(vm, separator)?,
    };
    let mut parts = Vec::with_capacity(items.len());
    join_into(vm, &items, &mut parts)?;
    Ok(Value::string(parts.join(&separator)))
}

fn equal(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    values_equal(vm, recv, &args[0]).map(Value::bool)
}

fn eql(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    super::hash::keys_eql(vm, recv, &args[0]).map(Value::bool)
}

fn hash(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    super::hash::hash_key(vm, recv).map(|hash| Value::Integer(hash as i64))
}

fn inspect_method(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let items = snapshot(vm, recv)?;
    let mut parts = Vec::with_capacity(items.len());
    for item in &items {
        parts.push(inspect(vm, item)?);
    }
    Ok(Value::string(format!("[{}]", parts.join(", "))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 3, Some(0))]
    #[case(-1, 3, Some(2))]
    #[case(-3, 3, Some(0))]
    #[case(-4, 3, None)]
    #[case(3, 3, None)]
    fn test_normalize(#[case] index: i64, #[case] len: usize, #[case] expected: Option<usize>) {
        assert_eq!(normalize(index, len), expected);
    }
}

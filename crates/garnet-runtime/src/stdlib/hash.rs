//! `Hash`: an insertion-ordered table keyed by `hash`/`eql?`
//!
//! Strings, arrays and ranges hash by content; objects use their guest
//! `hash` and `eql?` methods; everything else hashes by identity. String
//! keys are copied on insertion so later mutation of the caller's string
//! does not move the entry.

use super::{define, inspect, require_block, values_equal};
use crate::object::{Arity, ClassId};
use crate::value::{HashTable, Proc, Value};
use crate::vm::{Vm, VmResult};
use std::cell::RefCell;
use std::rc::Rc;

pub(super) fn install(vm: &mut Vm) {
    let h = ClassId::HASH;
    define(vm, h, "[]", Arity::exactly(1), get);
    define(vm, h, "[]=", Arity::exactly(2), set);
    define(vm, h, "store", Arity::exactly(2), set);
    define(vm, h, "fetch", Arity::range(1, 2), fetch);
    define(vm, h, "delete", Arity::exactly(1), delete);
    define(vm, h, "key?", Arity::exactly(1), has_key);
    define(vm, h, "has_key?", Arity::exactly(1), has_key);
    define(vm, h, "include?", Arity::exactly(1), has_key);
    define(vm, h, "member?", Arity::exactly(1), has_key);
    define(vm, h, "keys", Arity::exactly(0), keys);
    define(vm, h, "values", Arity::exactly(0), values);
    define(vm, h, "size", Arity::exactly(0), size);
    define(vm, h, "length", Arity::exactly(0), size);
    define(vm, h, "empty?", Arity::exactly(0), is_empty);
    define(vm, h, "each", Arity::exactly(0), each);
    define(vm, h, "each_pair", Arity::exactly(0), each);
    define(vm, h, "map", Arity::exactly(0), map);
    define(vm, h, "select", Arity::exactly(0), select);
    define(vm, h, "filter", Arity::exactly(0), select);
    define(vm, h, "merge", Arity::exactly(1), merge);
    define(vm, h, "to_a", Arity::exactly(0), to_a);
    define(vm, h, "to_h", Arity::exactly(0), to_h);
    define(vm, h, "==", Arity::exactly(1), equal);
    define(vm, h, "inspect", Arity::exactly(0), inspect_method);
    define(vm, h, "to_s", Arity::exactly(0), inspect_method);
}

// ============================================================================
// Table operations
// ============================================================================

pub(crate) fn hash_key(vm: &mut Vm, key: &Value) -> VmResult<u64> {
    match key {
        Value::String(s) => Ok(super::string::string_hash(&s.borrow())),
        Value::Array(items) => {
            let items = items.borrow().clone();
            let mut hash: u64 = 7;
            for item in &items {
                hash = hash.wrapping_mul(31).wrapping_add(hash_key(vm, item)?);
            }
            Ok(hash)
        }
        Value::Range(range) => {
            let start = hash_key(vm, &range.start)?;
            let end = hash_key(vm, &range.end)?;
            Ok(start.rotate_left(17) ^ end ^ u64::from(range.exclusive))
        }
        Value::Object(_) => match vm.call_method(key, "hash", Vec::new(), None)? {
            Value::Integer(hash) => Ok(hash as u64),
            _ => Ok(key.identity()),
        },
        other => Ok(other.identity()),
    }
}

/// Key equality (`eql?`): no Integer/Float crossover
pub(crate) fn keys_eql(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<bool> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(*x.borrow() == *y.borrow()),
        (Value::Array(x), Value::Array(y)) => {
            let left = x.borrow().clone();
            let right = y.borrow().clone();
            if left.len() != right.len() {
                return Ok(false);
            }
            for (l, r) in left.iter().zip(&right) {
                if !keys_eql(vm, l, r)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Range(x), Value::Range(y)) => Ok(x.exclusive == y.exclusive
            && keys_eql(vm, &x.start, &y.start)?
            && keys_eql(vm, &x.end, &y.end)?),
        (Value::Float(x), Value::Float(y)) => Ok(x == y),
        (Value::Object(_), _) => Ok(vm.call_method(a, "eql?", vec![b.clone()], None)?.is_truthy()),
        _ => Ok(a.identical(b)),
    }
}

/// Position of the entry whose key is `eql?` to `key`. A guest `eql?` may
/// change the table, so a match is located again by identity afterwards.
fn find_index(vm: &mut Vm, table: &Rc<RefCell<HashTable>>, hash: u64, key: &Value) -> VmResult<Option<usize>> {
    let candidates = table.borrow().candidates(hash);
    for candidate in candidates {
        if keys_eql(vm, &candidate, key)? {
            if let Some(index) = table.borrow().position_of(hash, &candidate) {
                return Ok(Some(index));
            }
        }
    }
    Ok(None)
}

pub(crate) fn hash_get(vm: &mut Vm, table: &Rc<RefCell<HashTable>>, key: &Value) -> VmResult<Option<Value>> {
    let hash = hash_key(vm, key)?;
    let index = find_index(vm, table, hash, key)?;
    Ok(index.and_then(|index| table.borrow().value_at(index)))
}

pub(crate) fn hash_set(vm: &mut Vm, table: &Rc<RefCell<HashTable>>, key: Value, value: Value) -> VmResult<()> {
    let hash = hash_key(vm, &key)?;
    match find_index(vm, table, hash, &key)? {
        Some(index) => table.borrow_mut().set_at(index, value),
        None => {
            let key = match &key {
                Value::String(s) => Value::string(s.borrow().clone()),
                _ => key,
            };
            table.borrow_mut().push(hash, key, value);
        }
    }
    Ok(())
}

pub(crate) fn hash_delete(vm: &mut Vm, table: &Rc<RefCell<HashTable>>, key: &Value) -> VmResult<Option<Value>> {
    let hash = hash_key(vm, key)?;
    let index = find_index(vm, table, hash, key)?;
    Ok(index.and_then(|index| table.borrow_mut().remove_at(index)))
}

/// One `key => value` pair; simple symbol keys use the `key: value` form
pub fn entry_inspect(key: &Value, key_text: String, value_text: String) -> String {
    match key {
        Value::Symbol(name) if is_label(name.as_str()) => format!("{}: {}", name, value_text),
        Value::Symbol(name) => {
            format!("{}: {}", super::string::string_inspect(name.as_str()), value_text)
        }
        _ => format!("{} => {}", key_text, value_text),
    }
}

fn is_label(name: &str) -> bool {
    let body = name.strip_suffix(['?', '!']).unwrap_or(name);
    let mut chars = body.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

pub fn wrap_entries(parts: &[String]) -> String {
    if parts.is_empty() {
        "{}".to_string()
    } else {
        format!("{{{}}}", parts.join(", "))
    }
}

// ============================================================================
// Methods
// ============================================================================

fn table_of(vm: &mut Vm, recv: &Value) -> VmResult<Rc<RefCell<HashTable>>> {
    match recv {
        Value::Hash(table) => Ok(Rc::clone(table)),
        other => Err(super::conversion_error(vm, other, "Hash")),
    }
}

fn get(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let table = table_of(vm, recv)?;
    Ok(hash_get(vm, &table, &args[0])?.unwrap_or(Value::Nil))
}

fn set(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let table = table_of(vm, recv)?;
    hash_set(vm, &table, args[0].clone(), args[1].clone())?;
    Ok(args[1].clone())
}

/// `fetch(key)`, `fetch(key, default)` or `fetch(key) { |key| }`
fn fetch(vm: &mut Vm, recv: &Value, args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let table = table_of(vm, recv)?;
    if let Some(value) = hash_get(vm, &table, &args[0])? {
        return Ok(value);
    }
    if let Some(block) = block {
        return vm.call_block(block, vec![args[0].clone()]);
    }
    if let Some(default) = args.get(1) {
        return Ok(default.clone());
    }
    let shown = inspect(vm, &args[0])?;
    Err(vm.raise_error(ClassId::KEY_ERROR, format!("key not found: {}", shown)))
}

fn delete(vm: &mut Vm, recv: &Value, args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let table = table_of(vm, recv)?;
    match (hash_delete(vm, &table, &args[0])?, block) {
        (Some(value), _) => Ok(value),
        (None, Some(block)) => vm.call_block(block, vec![args[0].clone()]),
        (None, None) => Ok(Value::Nil),
    }
}

fn has_key(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let table = table_of(vm, recv)?;
    Ok(Value::bool(hash_get(vm, &table, &args[0])?.is_some()))
}

fn keys(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let keys = table_of(vm, recv)?.borrow().keys();
    Ok(Value::array(keys))
}

fn values(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let values = table_of(vm, recv)?.borrow().values();
    Ok(Value::array(values))
}

fn size(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let len = table_of(vm, recv)?.borrow().len();
    Ok(Value::Integer(len as i64))
}

fn is_empty(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let empty = table_of(vm, recv)?.borrow().is_empty();
    Ok(Value::bool(empty))
}

fn pair(key: Value, value: Value) -> Value {
    Value::array(vec![key, value])
}

/// Yields `[key, value]`, which a two-parameter block destructures
fn each(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    let entries = table_of(vm, recv)?.borrow().entries();
    for (key, value) in entries {
        vm.call_block(block, vec![pair(key, value)])?;
    }
    Ok(recv.clone())
}

fn map(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    let entries = table_of(vm, recv)?.borrow().entries();
    let mut mapped = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        mapped.push(vm.call_block(block, vec![pair(key, value)])?);
    }
    Ok(Value::array(mapped))
}

fn select(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let block = require_block(vm, block)?;
    let entries = table_of(vm, recv)?.borrow().entries();
    let selected = Rc::new(RefCell::new(HashTable::new()));
    for (key, value) in entries {
        if vm.call_block(block, vec![pair(key.clone(), value.clone())])?.is_truthy() {
            hash_set(vm, &selected, key, value)?;
        }
    }
    Ok(Value::Hash(selected))
}

fn merge(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut entries = table_of(vm, recv)?.borrow().entries();
    entries.extend(table_of(vm, &args[0])?.borrow().entries());
    let merged = Rc::new(RefCell::new(HashTable::new()));
    for (key, value) in entries {
        hash_set(vm, &merged, key, value)?;
    }
    Ok(Value::Hash(merged))
}

fn to_a(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let entries = table_of(vm, recv)?.borrow().entries();
    Ok(Value::array(entries.into_iter().map(|(k, v)| pair(k, v)).collect()))
}

fn to_h(_vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(recv.clone())
}

fn equal(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    values_equal(vm, recv, &args[0]).map(Value::bool)
}

fn inspect_method(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let entries = table_of(vm, recv)?.borrow().entries();
    let mut parts = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let key_text = inspect(vm, &key)?;
        let value_text = inspect(vm, &value)?;
        parts.push(entry_inspect(&key, key_text, value_text));
    }
    Ok(Value::string(wrap_entries(&parts)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(Value::symbol("a"), "1", "a: 1")]
    #[case(Value::symbol("ok?"), "1", "ok?: 1")]
    #[case(Value::symbol("two words"), "1", r#""two words": 1"#)]
    #[case(Value::string("k"), "2", r#""k" => 2"#)]
    fn test_entry_inspect(#[case] key: Value, #[case] value: &str, #[case] expected: &str) {
        let key_text = match &key {
            Value::String(s) => super::super::string::string_inspect(&s.borrow()),
            _ => String::new(),
        };
        assert_eq!(entry_inspect(&key, key_text, value.to_string()), expected);
    }

    #[test]
    fn test_wrap_entries() {
        assert_eq!(wrap_entries(&[]), "{}");
        assert_eq!(wrap_entries(&["a: 1".to_string(), "b: 2".to_string()]), "{a: 1, b: 2}");
    }
}

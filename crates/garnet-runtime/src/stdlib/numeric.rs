//! `Integer` and `Float`
//!
//! Integer arithmetic is 64-bit and checked: a result that does not fit
//! raises `RangeError` instead of wrapping. Division and modulo round
//! toward negative infinity, so the sign of `a % b` follows `b`.

use super::{class_name, define, expect_integer, format_float, require_block};
use crate::object::{Arity, ClassId};
use crate::value::{Proc, Value};
use crate::vm::{Control, Vm, VmResult};
use std::cmp::Ordering;
use std::rc::Rc;

pub(super) fn install(vm: &mut Vm) {
    for class in [ClassId::INTEGER, ClassId::FLOAT] {
        define(vm, class, "+", Arity::exactly(1), add);
        define(vm, class, "-", Arity::exactly(1), sub);
        define(vm, class, "*", Arity::exactly(1), mul);
        define(vm, class, "/", Arity::exactly(1), div);
        define(vm, class, "%", Arity::exactly(1), modulo);
        define(vm, class, "modulo", Arity::exactly(1), modulo);
        define(vm, class, "**", Arity::exactly(1), pow);
        define(vm, class, "-@", Arity::exactly(0), negate);
        define(vm, class, "+@", Arity::exactly(0), identity);
        define(vm, class, "==", Arity::exactly(1), equal);
        define(vm, class, "eql?", Arity::exactly(1), eql);
        define(vm, class, "hash", Arity::exactly(0), hash);
        define(vm, class, "<", Arity::exactly(1), less);
        define(vm, class, "<=", Arity::exactly(1), less_equal);
        define(vm, class, ">", Arity::exactly(1), greater);
        define(vm, class, ">=", Arity::exactly(1), greater_equal);
        define(vm, class, "<=>", Arity::exactly(1), spaceship);
        define(vm, class, "zero?", Arity::exactly(0), is_zero);
        define(vm, class, "abs", Arity::exactly(0), abs);
        define(vm, class, "to_f", Arity::exactly(0), to_f);
    }

    let int = ClassId::INTEGER;
    define(vm, int, "to_s", Arity::range(0, 1), integer_to_s);
    define(vm, int, "inspect", Arity::exactly(0), integer_to_s);
    define(vm, int, "to_i", Arity::exactly(0), identity);
    define(vm, int, "floor", Arity::exactly(0), identity);
    define(vm, int, "ceil", Arity::exactly(0), identity);
    define(vm, int, "round", Arity::exactly(0), identity);
    define(vm, int, "succ", Arity::exactly(0), succ);
    define(vm, int, "pred", Arity::exactly(0), pred);
    define(vm, int, "even?", Arity::exactly(0), even);
    define(vm, int, "odd?", Arity::exactly(0), odd);
    define(vm, int, "times", Arity::exactly(0), times);
    define(vm, int, "upto", Arity::exactly(1), upto);
    define(vm, int, "downto", Arity::exactly(1), downto);

    let float = ClassId::FLOAT;
    define(vm, float, "to_s", Arity::exactly(0), float_to_s);
    define(vm, float, "inspect", Arity::exactly(0), float_to_s);
    define(vm, float, "to_i", Arity::exactly(0), truncate);
    define(vm, float, "truncate", Arity::exactly(0), truncate);
    define(vm, float, "floor", Arity::exactly(0), floor);
    define(vm, float, "ceil", Arity::exactly(0), ceil);
    define(vm, float, "round", Arity::exactly(0), round);
    define(vm, float, "nan?", Arity::exactly(0), is_nan);
    define(vm, float, "infinite?", Arity::exactly(0), is_infinite);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Integer(i) => Some(Num::Int(*i)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn cmp(self, other: Num) -> Option<Ordering> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

/// Text used for a value in coercion and comparison errors
fn shown(vm: &mut Vm, value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::True => "true".to_string(),
        Value::False => "false".to_string(),
        other => class_name(vm, other),
    }
}

fn receiver(vm: &mut Vm, recv: &Value) -> VmResult<Num> {
    match Num::of(recv) {
        Some(num) => Ok(num),
        None => {
            let shown = shown(vm, recv);
            Err(vm.raise_error(ClassId::TYPE_ERROR, format!("{} is not a number", shown)))
        }
    }
}

fn operand(vm: &mut Vm, recv: Num, arg: &Value) -> VmResult<Num> {
    match Num::of(arg) {
        Some(num) => Ok(num),
        None => {
            let target = match recv {
                Num::Int(_) => "Integer",
                Num::Float(_) => "Float",
            };
            let shown = shown(vm, arg);
            Err(vm.raise_error(
                ClassId::TYPE_ERROR,
                format!("{} can't be coerced into {}", shown, target),
            ))
        }
    }
}

fn num_value(num: Num) -> Value {
    match num {
        Num::Int(i) => Value::Integer(i),
        Num::Float(f) => Value::Float(f),
    }
}

// ============================================================================
// Arithmetic
// ============================================================================

fn arithmetic(vm: &mut Vm, recv: &Value, arg: &Value, op: ArithOp) -> VmResult<Value> {
    let left = receiver(vm, recv)?;
    let right = operand(vm, left, arg)?;
    match (left, right) {
        (Num::Int(a), Num::Int(b)) => integer_op(vm, a, b, op),
        (a, b) => Ok(Value::Float(float_op(a.as_f64(), b.as_f64(), op))),
    }
}

fn integer_op(vm: &mut Vm, a: i64, b: i64, op: ArithOp) -> VmResult<Value> {
    let result = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div | ArithOp::Mod if b == 0 => {
            return Err(vm.raise_error(ClassId::ZERO_DIVISION_ERROR, "divided by 0"))
        }
        ArithOp::Div => floor_div(a, b),
        ArithOp::Mod => floor_mod(a, b),
        ArithOp::Pow if b < 0 => return Ok(Value::Float((a as f64).powf(b as f64))),
        ArithOp::Pow => integer_pow(a, b),
    };
    match result {
        Some(value) => Ok(Value::Integer(value)),
        None => Err(overflow(vm)),
    }
}

fn overflow(vm: &mut Vm) -> Control {
    vm.raise_error(ClassId::RANGE_ERROR, "integer overflow")
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let quotient = a.checked_div(b)?;
    let remainder = a.checked_rem(b)?;
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        quotient.checked_sub(1)
    } else {
        Some(quotient)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let remainder = a.checked_rem(b)?;
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        Some(remainder + b)
    } else {
        Some(remainder)
    }
}

fn integer_pow(base: i64, exponent: i64) -> Option<i64> {
    match base {
        0 | 1 => Some(base),
        -1 => Some(if exponent % 2 == 0 { 1 } else { -1 }),
        _ => u32::try_from(exponent)
            .ok()
            .and_then(|exponent| base.checked_pow(exponent)),
    }
}

fn float_op(a: f64, b: f64, op: ArithOp) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Mod => {
            let remainder = a % b;
            if remainder != 0.0 && ((remainder < 0.0) != (b < 0.0)) {
                remainder + b
            } else {
                remainder
            }
        }
        ArithOp::Pow => a.powf(b),
    }
}

fn add(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    arithmetic(vm, recv, &args[0], ArithOp::Add)
}

fn sub(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    arithmetic(vm, recv, &args[0], ArithOp::Sub)
}

fn mul(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    arithmetic(vm, recv, &args[0], ArithOp::Mul)
}

fn div(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    arithmetic(vm, recv, &args[0], ArithOp::Div)
}

fn modulo(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    arithmetic(vm, recv, &args[0], ArithOp::Mod)
}

fn pow(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    arithmetic(vm, recv, &args[0], ArithOp::Pow)
}

fn negate(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    match receiver(vm, recv)? {
        Num::Int(i) => i.checked_neg().map(Value::Integer).ok_or_else(|| overflow(vm)),
        Num::Float(f) => Ok(Value::Float(-f)),
    }
}

fn identity(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    receiver(vm, recv).map(num_value)
}

fn abs(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    match receiver(vm, recv)? {
        Num::Int(i) => i.checked_abs().map(Value::Integer).ok_or_else(|| overflow(vm)),
        Num::Float(f) => Ok(Value::Float(f.abs())),
    }
}

// ============================================================================
// Comparison
// ============================================================================

fn equal(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let left = receiver(vm, recv)?;
    Ok(Value::bool(
        Num::of(&args[0]).map_or(false, |right| left.cmp(right) == Some(Ordering::Equal)),
    ))
}

/// Same class and same value: `1.eql?(1.0)` is false
fn eql(_vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(match (recv, &args[0]) {
        (Value::Integer(a), Value::Integer(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        _ => false,
    }))
}

fn hash(_vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::Integer(recv.identity() as i64))
}

fn ordered(vm: &mut Vm, recv: &Value, arg: &Value, test: fn(Ordering) -> bool) -> VmResult<Value> {
    let left = receiver(vm, recv)?;
    match Num::of(arg) {
        Some(right) => Ok(Value::bool(left.cmp(right).map_or(false, test))),
        None => {
            let this = class_name(vm, recv);
            let other = shown(vm, arg);
            Err(vm.raise_error(
                ClassId::ARGUMENT_ERROR,
                format!("comparison of {} with {} failed", this, other),
            ))
        }
    }
}

fn less(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    ordered(vm, recv, &args[0], Ordering::is_lt)
}

fn less_equal(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    ordered(vm, recv, &args[0], Ordering::is_le)
}

fn greater(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    ordered(vm, recv, &args[0], Ordering::is_gt)
}

fn greater_equal(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    ordered(vm, recv, &args[0], Ordering::is_ge)
}

/// -1, 0 or 1; nil against a non-number
fn spaceship(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let left = receiver(vm, recv)?;
    Ok(match Num::of(&args[0]).and_then(|right| left.cmp(right)) {
        Some(ordering) => Value::Integer(ordering as i64),
        None => Value::Nil,
    })
}

fn is_zero(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(receiver(vm, recv)?.as_f64() == 0.0))
}

// ============================================================================
// Conversion
// ============================================================================

fn to_f(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::Float(receiver(vm, recv)?.as_f64()))
}

fn integer_to_s(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let value = expect_integer(vm, recv)?;
    let base = match args.first() {
        Some(base) => expect_integer(vm, base)?,
        None => 10,
    };
    if !(2..=36).contains(&base) {
        return Err(vm.raise_error(ClassId::ARGUMENT_ERROR, format!("invalid radix {}", base)));
    }
    Ok(Value::string(radix(value, base as u32)))
}

fn radix(value: i64, base: u32) -> String {
    if base == 10 {
        return value.to_string();
    }
    let mut magnitude = value.unsigned_abs();
    let mut digits = Vec::new();
    loop {
        let digit = (magnitude % u64::from(base)) as u32;
        digits.push(std::char::from_digit(digit, base).unwrap_or('?'));
        magnitude /= u64::from(base);
        if magnitude == 0 {
            break;
        }
    }
    if value < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

fn float_to_s(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::string(format_float(receiver(vm, recv)?.as_f64())))
}

/// Float to Integer; NaN and infinities have no integer value
fn float_to_integer(vm: &mut Vm, value: f64) -> VmResult<Value> {
    if value.is_nan() || value.is_infinite() || value.abs() >= 9.223_372_036_854_775_807e18 {
        return Err(vm.raise_error(ClassId::RANGE_ERROR, format_float(value)));
    }
    Ok(Value::Integer(value as i64))
}

fn truncate(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let value = receiver(vm, recv)?.as_f64();
    float_to_integer(vm, value.trunc())
}

fn floor(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let value = receiver(vm, recv)?.as_f64();
    float_to_integer(vm, value.floor())
}

fn ceil(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let value = receiver(vm, recv)?.as_f64();
    float_to_integer(vm, value.ceil())
}

/// Half away from zero
fn round(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let value = receiver(vm, recv)?.as_f64();
    float_to_integer(vm, value.round())
}

fn is_nan(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(receiver(vm, recv)?.as_f64().is_nan()))
}

fn is_infinite(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let value = receiver(vm, recv)?.as_f64();
    Ok(match value {
        v if v == f64::INFINITY => Value::Integer(1),
        v if v == f64::NEG_INFINITY => Value::Integer(-1),
        _ => Value::Nil,
    })
}

// ============================================================================
// Integer iteration
// ============================================================================

fn succ(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let value = expect_integer(vm, recv)?;
    value.checked_add(1).map(Value::Integer).ok_or_else(|| overflow(vm))
}

fn pred(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let value = expect_integer(vm, recv)?;
    value.checked_sub(1).map(Value::Integer).ok_or_else(|| overflow(vm))
}

fn even(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(expect_integer(vm, recv)? % 2 == 0))
}

fn odd(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(expect_integer(vm, recv)? % 2 != 0))
}

/// `n.times { |i| }`: yields 0...n, returns n
fn times(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let count = expect_integer(vm, recv)?;
    let block = require_block(vm, block)?;
    for index in 0..count {
        vm.call_block(block, vec![Value::Integer(index)])?;
    }
    Ok(recv.clone())
}

fn upto(vm: &mut Vm, recv: &Value, args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let from = expect_integer(vm, recv)?;
    let to = expect_integer(vm, &args[0])?;
    let block = require_block(vm, block)?;
    for index in from..=to {
        vm.call_block(block, vec![Value::Integer(index)])?;
    }
    Ok(recv.clone())
}

fn downto(vm: &mut Vm, recv: &Value, args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let from = expect_integer(vm, recv)?;
    let to = expect_integer(vm, &args[0])?;
    let block = require_block(vm, block)?;
    for index in (to..=from).rev() {
        vm.call_block(block, vec![Value::Integer(index)])?;
    }
    Ok(recv.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(7, 2, Some(3))]
    #[case(-7, 2, Some(-4))]
    #[case(7, -2, Some(-4))]
    #[case(-7, -2, Some(3))]
    #[case(i64::MIN, -1, None)]
    fn test_floor_div(#[case] a: i64, #[case] b: i64, #[case] expected: Option<i64>) {
        assert_eq!(floor_div(a, b), expected);
    }

    #[rstest]
    #[case(7, 3, 1)]
    #[case(-7, 3, 2)]
    #[case(7, -3, -2)]
    #[case(-7, -3, -1)]
    fn test_floor_mod_follows_divisor_sign(#[case] a: i64, #[case] b: i64, #[case] expected: i64) {
        assert_eq!(floor_mod(a, b), Some(expected));
    }

    #[test]
    fn test_integer_pow_overflow() {
        assert_eq!(integer_pow(2, 10), Some(1024));
        assert_eq!(integer_pow(2, 64), None);
        assert_eq!(integer_pow(-1, 1 << 40), Some(1));
    }

    #[test]
    fn test_float_mod_sign() {
        assert_eq!(float_op(-7.0, 3.0, ArithOp::Mod), 2.0);
        assert!(float_op(1.0, 0.0, ArithOp::Mod).is_nan());
    }

    #[rstest]
    #[case(255, 16, "ff")]
    #[case(-5, 2, "-101")]
    #[case(0, 8, "0")]
    fn test_radix(#[case] value: i64, #[case] base: u32, #[case] expected: &str) {
        assert_eq!(radix(value, base), expected);
    }
}

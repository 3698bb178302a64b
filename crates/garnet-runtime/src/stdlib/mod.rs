//! Builtin classes and methods
//!
//! Every builtin is a [`NativeFn`] installed into a class's method table
//! when the VM is created. Builtins may call back into the VM to dispatch
//! methods or run blocks; they never hold a `RefCell` borrow across such a
//! call, since guest code may mutate the same container.

pub mod array;
pub mod exception;
pub mod hash;
pub mod kernel;
pub mod module;
pub mod numeric;
pub mod proc;
pub mod range;
pub mod string;

use crate::object::{Arity, ClassId, ClassTable, MethodDef, MethodEntry, NativeFn, Visibility};
use crate::symbol::Symbol;
use crate::value::{Proc, Value};
use crate::vm::{Vm, VmResult};
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

/// Sink for `puts`, `print` and `p`
pub type OutputWriter = Rc<RefCell<Box<dyn Write>>>;

pub fn stdout_writer() -> OutputWriter {
    Rc::new(RefCell::new(Box::new(io::stdout())))
}

/// In-memory output sink; clones share one buffer
#[derive(Clone, Default)]
pub struct CaptureBuffer(Rc<RefCell<Vec<u8>>>);

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writer(&self) -> OutputWriter {
        Rc::new(RefCell::new(Box::new(self.clone())))
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn install(vm: &mut Vm) {
    kernel::install(vm);
    module::install(vm);
    numeric::install(vm);
    string::install(vm);
    array::install(vm);
    hash::install(vm);
    range::install(vm);
    proc::install(vm);
    exception::install(vm);
}

// ============================================================================
// Registration
// ============================================================================

pub(crate) fn define(vm: &mut Vm, class: ClassId, name: &str, arity: Arity, func: NativeFn) {
    add_native(vm, class, name, arity, func, Visibility::Public);
}

pub(crate) fn define_private(
    vm: &mut Vm,
    class: ClassId,
    name: &str,
    arity: Arity,
    func: NativeFn,
) {
    add_native(vm, class, name, arity, func, Visibility::Private);
}

/// Class-level method (`Foo.bar`)
pub(crate) fn define_singleton(
    vm: &mut Vm,
    class: ClassId,
    name: &str,
    arity: Arity,
    func: NativeFn,
) {
    let meta = vm.classes.metaclass_of(class);
    add_native(vm, meta, name, arity, func, Visibility::Public);
}

fn add_native(
    vm: &mut Vm,
    class: ClassId,
    name: &str,
    arity: Arity,
    func: NativeFn,
    visibility: Visibility,
) {
    vm.classes.add_method(
        class,
        MethodEntry {
            name: Symbol::new(name),
            owner: class,
            visibility,
            def: MethodDef::Native { func, arity },
        },
    );
}

// ============================================================================
// Argument helpers
// ============================================================================

pub(crate) fn class_name(vm: &mut Vm, value: &Value) -> String {
    let class = vm.real_class_of(value);
    vm.classes.name_of(class)
}

pub(crate) fn require_block<'b>(
    vm: &mut Vm,
    block: Option<&'b Rc<Proc>>,
) -> VmResult<&'b Rc<Proc>> {
    match block {
        Some(block) => Ok(block),
        None => Err(vm.raise_error(ClassId::LOCAL_JUMP_ERROR, "no block given (yield)")),
    }
}

pub(crate) fn expect_integer(vm: &mut Vm, value: &Value) -> VmResult<i64> {
    match value {
        Value::Integer(i) => Ok(*i),
        Value::Float(f) => Ok(*f as i64),
        other => Err(conversion_error(vm, other, "Integer")),
    }
}

pub(crate) fn expect_string(vm: &mut Vm, value: &Value) -> VmResult<String> {
    match value {
        Value::String(s) => Ok(s.borrow().clone()),
        other => Err(conversion_error(vm, other, "String")),
    }
}

/// Method or variable name given as a symbol or string
pub(crate) fn expect_name(vm: &mut Vm, value: &Value) -> VmResult<Symbol> {
    match value {
        Value::Symbol(name) => Ok(name.clone()),
        Value::String(s) => Ok(Symbol::new(&s.borrow())),
        other => {
            let shown = plain_inspect(&vm.classes, other);
            Err(vm.raise_error(
                ClassId::TYPE_ERROR,
                format!("{} is not a symbol nor a string", shown),
            ))
        }
    }
}

pub(crate) fn conversion_error(vm: &mut Vm, value: &Value, into: &str) -> crate::vm::Control {
    let shown = match value {
        Value::Nil => "nil".to_string(),
        Value::True => "true".to_string(),
        Value::False => "false".to_string(),
        other => class_name(vm, other),
    };
    vm.raise_error(
        ClassId::TYPE_ERROR,
        format!("no implicit conversion of {} into {}", shown, into),
    )
}

pub(crate) fn write_output(vm: &mut Vm, text: &str) -> VmResult<()> {
    let written = {
        let mut out = vm.output().borrow_mut();
        out.write_all(text.as_bytes()).and_then(|()| out.flush())
    };
    written.map_err(|err| vm.raise_error(ClassId::RUNTIME_ERROR, format!("output error: {}", err)))
}

// ============================================================================
// Conversion to text
// ============================================================================

/// Float text: `1.0`, `0.5`, `1.0e+20`, `Infinity`
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude >= 1e16 || (magnitude != 0.0 && magnitude < 1e-4) {
        let text = format!("{:e}", value);
        let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{}.0", mantissa)
        };
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{}e{}{:0>2}", mantissa, sign, digits);
    }
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// `to_s` for values whose text never depends on guest methods
pub fn plain_to_s(classes: &ClassTable, value: &Value) -> String {
    match value {
        Value::Nil => String::new(),
        Value::String(s) => s.borrow().clone(),
        Value::Symbol(s) => s.to_string(),
        Value::Class(id) => classes.name_of(*id),
        Value::Object(object) => {
            format!("#<{}>", classes.name_of(classes.real_class(object.class.get())))
        }
        other => plain_inspect(classes, other),
    }
}

/// `inspect` without calling guest methods
pub fn plain_inspect(classes: &ClassTable, value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::True => "true".to_string(),
        Value::False => "false".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Symbol(s) => string::symbol_inspect(s.as_str()),
        Value::String(s) => string::string_inspect(&s.borrow()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .borrow()
                .iter()
                .map(|item| plain_inspect(classes, item))
                .collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Hash(table) => {
            let parts: Vec<String> = table
                .borrow()
                .entries()
                .iter()
                .map(|(k, v)| hash::entry_inspect(k, plain_inspect(classes, k), plain_inspect(classes, v)))
                .collect();
            hash::wrap_entries(&parts)
        }
        Value::Range(range) => format!(
            "{}{}{}",
            plain_inspect(classes, &range.start),
            if range.exclusive { "..." } else { ".." },
            plain_inspect(classes, &range.end)
        ),
        Value::Object(_) | Value::Class(_) => plain_to_s(classes, value),
        Value::Proc(p) => proc::proc_inspect(p, value.identity()),
        Value::Signal(signal) => format!("#<signal {}>", signal.reason),
    }
}

/// Guest `to_s`: strings as-is, everything else through dispatch
pub(crate) fn to_s(vm: &mut Vm, value: &Value) -> VmResult<String> {
    if let Value::String(s) = value {
        return Ok(s.borrow().clone());
    }
    match vm.call_method(value, "to_s", Vec::new(), None)? {
        Value::String(s) => Ok(s.borrow().clone()),
        _ => Ok(plain_to_s(&vm.classes, value)),
    }
}

/// Guest `inspect` through dispatch
pub(crate) fn inspect(vm: &mut Vm, value: &Value) -> VmResult<String> {
    match vm.call_method(value, "inspect", Vec::new(), None)? {
        Value::String(s) => Ok(s.borrow().clone()),
        _ => Ok(plain_inspect(&vm.classes, value)),
    }
}

// ============================================================================
// Equality
// ============================================================================

/// Guest `==`: numeric across Integer/Float, element-wise for containers,
/// the receiver's `==` for objects
pub(crate) fn values_equal(vm: &mut Vm, a: &Value, b: &Value) -> VmResult<bool> {
    match (a, b) {
        (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => {
            Ok((*x as f64) == *y)
        }
        (Value::Array(x), Value::Array(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let left = x.borrow().clone();
            let right = y.borrow().clone();
            if left.len() != right.len() {
                return Ok(false);
            }
            for (l, r) in left.iter().zip(&right) {
                if !values_equal(vm, l, r)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Hash(x), Value::Hash(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let left = x.borrow().entries();
            if left.len() != y.borrow().len() {
                return Ok(false);
            }
            for (key, value) in left {
                match hash::hash_get(vm, y, &key)? {
                    Some(other) if values_equal(vm, &value, &other)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (Value::Object(_), _) => Ok(vm.call_method(a, "==", vec![b.clone()], None)?.is_truthy()),
        _ => Ok(a == b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(1.0, "1.0")]
    #[case(0.5, "0.5")]
    #[case(-2.25, "-2.25")]
    #[case(1e20, "1.0e+20")]
    #[case(1.5e-7, "1.5e-07")]
    #[case(f64::INFINITY, "Infinity")]
    fn test_format_float(#[case] value: f64, #[case] expected: &str) {
        assert_eq!(format_float(value), expected);
    }

    #[test]
    fn test_capture_buffer_shares_contents() {
        let buffer = CaptureBuffer::new();
        let writer = buffer.writer();
        writer.borrow_mut().write_all(b"hi\n").unwrap();
        assert_eq!(buffer.contents(), "hi\n");
    }

    #[test]
    fn test_plain_inspect_nested() {
        let classes = ClassTable::new();
        let value = Value::array(vec![
            Value::Integer(1),
            Value::string("a\"b"),
            Value::symbol("sym"),
            Value::Nil,
        ]);
        assert_eq!(plain_inspect(&classes, &value), r#"[1, "a\"b", :sym, nil]"#);
    }
}

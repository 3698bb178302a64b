//! `String` and `Symbol`

use super::{conversion_error, define, expect_integer, expect_string};
use crate::object::{Arity, ClassId};
use crate::symbol::Symbol;
use crate::value::{Proc, Value};
use crate::vm::{Vm, VmResult};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

pub(super) fn install(vm: &mut Vm) {
    let s = ClassId::STRING;
    define(vm, s, "+", Arity::exactly(1), concat);
    define(vm, s, "*", Arity::exactly(1), repeat);
    define(vm, s, "<<", Arity::exactly(1), append);
    define(vm, s, "concat", Arity::exactly(1), append);
    define(vm, s, "==", Arity::exactly(1), equal);
    define(vm, s, "eql?", Arity::exactly(1), equal);
    define(vm, s, "hash", Arity::exactly(0), hash);
    define(vm, s, "<=>", Arity::exactly(1), compare);
    define(vm, s, "length", Arity::exactly(0), length);
    define(vm, s, "size", Arity::exactly(0), length);
    define(vm, s, "to_s", Arity::exactly(0), itself);
    define(vm, s, "to_str", Arity::exactly(0), itself);
    define(vm, s, "to_sym", Arity::exactly(0), to_sym);
    define(vm, s, "to_i", Arity::exactly(0), to_i);
    define(vm, s, "to_f", Arity::exactly(0), to_f);
    define(vm, s, "inspect", Arity::exactly(0), inspect);
    define(vm, s, "upcase", Arity::exactly(0), upcase);
    define(vm, s, "downcase", Arity::exactly(0), downcase);
    define(vm, s, "capitalize", Arity::exactly(0), capitalize);
    define(vm, s, "reverse", Arity::exactly(0), reverse);
    define(vm, s, "strip", Arity::exactly(0), strip);
    define(vm, s, "empty?", Arity::exactly(0), is_empty);
    define(vm, s, "include?", Arity::exactly(1), includes);
    define(vm, s, "start_with?", Arity::exactly(1), starts_with);
    define(vm, s, "end_with?", Arity::exactly(1), ends_with);
    define(vm, s, "chars", Arity::exactly(0), chars);
    define(vm, s, "split", Arity::range(0, 1), split);
    define(vm, s, "[]", Arity::range(1, 2), index);
    define(vm, s, "dup", Arity::exactly(0), dup);

    let sym = ClassId::SYMBOL;
    define(vm, sym, "to_s", Arity::exactly(0), symbol_to_s);
    define(vm, sym, "name", Arity::exactly(0), symbol_to_s);
    define(vm, sym, "to_sym", Arity::exactly(0), itself);
    define(vm, sym, "inspect", Arity::exactly(0), symbol_inspect_method);
    define(vm, sym, "to_proc", Arity::exactly(0), symbol_to_proc);
    define(vm, sym, "length", Arity::exactly(0), symbol_length);
    define(vm, sym, "size", Arity::exactly(0), symbol_length);
    define(vm, sym, "<=>", Arity::exactly(1), symbol_compare);
}

// ============================================================================
// Inspection
// ============================================================================

/// Double-quoted literal form with escapes
pub fn string_inspect(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0b' => out.push_str("\\v"),
            '\x0c' => out.push_str("\\f"),
            '\x1b' => out.push_str("\\e"),
            '#' if matches!(chars.peek(), Some('{' | '$' | '@')) => out.push_str("\\#"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

const OPERATOR_SYMBOLS: &[&str] = &[
    "+", "-", "*", "/", "%", "**", "==", "!=", "<", "<=", ">", ">=", "<=>", "===", "=~", "!~",
    "!", "[]", "[]=", "<<", ">>", "&", "|", "^", "~", "+@", "-@",
];

/// `:name`, quoting names that are not valid bare symbols
pub fn symbol_inspect(name: &str) -> String {
    if is_bare_symbol(name) {
        format!(":{}", name)
    } else {
        format!(":{}", string_inspect(name))
    }
}

fn is_bare_symbol(name: &str) -> bool {
    if OPERATOR_SYMBOLS.contains(&name) {
        return true;
    }
    let body = name
        .strip_prefix("@@")
        .or_else(|| name.strip_prefix('@'))
        .or_else(|| name.strip_prefix('$'))
        .unwrap_or(name);
    let prefixed = body.len() != name.len();
    let body = if prefixed {
        body
    } else {
        body.strip_suffix(|c: char| matches!(c, '?' | '!' | '='))
            .unwrap_or(body)
    };
    let mut chars = body.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Content hash; `DefaultHasher::new()` is unkeyed, so equal strings hash
/// equally across runs
pub(crate) fn string_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

fn text_of(vm: &mut Vm, recv: &Value) -> VmResult<String> {
    expect_string(vm, recv)
}

// ============================================================================
// String
// ============================================================================

fn concat(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut text = text_of(vm, recv)?;
    text.push_str(&expect_string(vm, &args[0])?);
    Ok(Value::string(text))
}

fn repeat(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let text = text_of(vm, recv)?;
    let count = match &args[0] {
        Value::Integer(n) => *n,
        other => return Err(conversion_error(vm, other, "Integer")),
    };
    if count < 0 {
        return Err(vm.raise_error(ClassId::ARGUMENT_ERROR, "negative argument"));
    }
    Ok(Value::string(text.repeat(count as usize)))
}

/// Mutates the receiver in place
fn append(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let addition = match &args[0] {
        Value::Integer(code) => match u32::try_from(*code).ok().and_then(char::from_u32) {
            Some(c) => c.to_string(),
            None => return Err(vm.raise_error(ClassId::RANGE_ERROR, format!("{} out of char range", code))),
        },
        other => expect_string(vm, other)?,
    };
    match recv {
        Value::String(text) => text.borrow_mut().push_str(&addition),
        other => return Err(conversion_error(vm, other, "String")),
    }
    Ok(recv.clone())
}

fn equal(_vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(match (recv, &args[0]) {
        (Value::String(a), Value::String(b)) => *a.borrow() == *b.borrow(),
        _ => false,
    }))
}

fn hash(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let text = text_of(vm, recv)?;
    Ok(Value::Integer(string_hash(&text) as i64))
}

fn compare(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let text = text_of(vm, recv)?;
    Ok(match &args[0] {
        Value::String(other) => Value::Integer(text.as_str().cmp(other.borrow().as_str()) as i64),
        _ => Value::Nil,
    })
}

fn length(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::Integer(text_of(vm, recv)?.chars().count() as i64))
}

fn itself(_vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(recv.clone())
}

fn dup(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::string(text_of(vm, recv)?))
}

fn to_sym(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::Symbol(Symbol::from(text_of(vm, recv)?)))
}

/// Leading integer, ignoring surrounding whitespace and underscores
/// between digits; `0` when there is none
fn to_i(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let text = text_of(vm, recv)?;
    Ok(Value::Integer(leading_integer(&text)))
}

fn leading_integer(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let mut value: i64 = 0;
    let mut previous_underscore = false;
    for (i, c) in digits.char_indices() {
        match c {
            '0'..='9' => {
                let digit = i64::from(c as u8 - b'0');
                value = value.saturating_mul(10).saturating_add(digit);
                previous_underscore = false;
            }
            '_' if i > 0 && !previous_underscore => previous_underscore = true,
            _ => break,
        }
    }
    if negative {
        -value
    } else {
        value
    }
}

fn to_f(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let text = text_of(vm, recv)?;
    let candidate: String = text
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+' | '_'))
        .filter(|c| *c != '_')
        .collect();
    let mut end = candidate.len();
    while end > 0 {
        if let Ok(value) = candidate[..end].parse::<f64>() {
            return Ok(Value::Float(value));
        }
        end -= 1;
    }
    Ok(Value::Float(0.0))
}

fn inspect(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::string(string_inspect(&text_of(vm, recv)?)))
}

fn upcase(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::string(text_of(vm, recv)?.to_uppercase()))
}

fn downcase(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::string(text_of(vm, recv)?.to_lowercase()))
}

fn capitalize(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let text = text_of(vm, recv)?;
    let mut chars = text.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    };
    Ok(Value::string(capitalized))
}

fn reverse(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::string(text_of(vm, recv)?.chars().rev().collect::<String>()))
}

fn strip(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::string(text_of(vm, recv)?.trim()))
}

fn is_empty(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::bool(text_of(vm, recv)?.is_empty()))
}

fn includes(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let text = text_of(vm, recv)?;
    let needle = expect_string(vm, &args[0])?;
    Ok(Value::bool(text.contains(needle.as_str())))
}

fn starts_with(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let text = text_of(vm, recv)?;
    let prefix = expect_string(vm, &args[0])?;
    Ok(Value::bool(text.starts_with(prefix.as_str())))
}

fn ends_with(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let text = text_of(vm, recv)?;
    let suffix = expect_string(vm, &args[0])?;
    Ok(Value::bool(text.ends_with(suffix.as_str())))
}

fn chars(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let text = text_of(vm, recv)?;
    Ok(Value::array(text.chars().map(|c| Value::string(c.to_string())).collect()))
}

/// Whitespace-separated fields, or fields around a literal separator
fn split(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let text = text_of(vm, recv)?;
    let separator = match args.first() {
        Some(Value::Nil) | None => None,
        Some(other) => Some(expect_string(vm, other)?),
    };
    let mut fields: Vec<Value> = match separator.as_deref() {
        None | Some(" ") => text.split_whitespace().map(Value::string).collect(),
        Some("") => text.chars().map(|c| Value::string(c.to_string())).collect(),
        Some(separator) => text.split(separator).map(Value::string).collect(),
    };
    while matches!(fields.last(), Some(Value::String(s)) if s.borrow().is_empty()) {
        fields.pop();
    }
    Ok(Value::array(fields))
}

/// `s[i]` and `s[start, len]` by character position
fn index(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let chars: Vec<char> = text_of(vm, recv)?.chars().collect();
    let len = chars.len() as i64;
    let mut start = expect_integer(vm, &args[0])?;
    if start < 0 {
        start += len;
    }
    match args.get(1) {
        None => Ok(if (0..len).contains(&start) {
            Value::string(chars[start as usize].to_string())
        } else {
            Value::Nil
        }),
        Some(count) => {
            let count = expect_integer(vm, count)?;
            if start < 0 || start > len || count < 0 {
                return Ok(Value::Nil);
            }
            let end = (start + count).min(len);
            Ok(Value::string(chars[start as usize..end as usize].iter().collect::<String>()))
        }
    }
}

// ============================================================================
// Symbol
// ============================================================================

fn symbol_name(vm: &mut Vm, recv: &Value) -> VmResult<Symbol> {
    match recv {
        Value::Symbol(name) => Ok(name.clone()),
        other => Err(conversion_error(vm, other, "Symbol")),
    }
}

fn symbol_to_s(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::string(symbol_name(vm, recv)?.as_str()))
}

fn symbol_inspect_method(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::string(symbol_inspect(symbol_name(vm, recv)?.as_str())))
}

/// `:name.to_proc`: a lambda calling `name` on its first argument
fn symbol_to_proc(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    match vm.to_proc(recv.clone())? {
        Some(block) => Ok(Value::Proc(block)),
        None => Ok(Value::Nil),
    }
}

fn symbol_length(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    Ok(Value::Integer(symbol_name(vm, recv)?.as_str().chars().count() as i64))
}

fn symbol_compare(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let name = symbol_name(vm, recv)?;
    Ok(match &args[0] {
        Value::Symbol(other) => Value::Integer(name.as_str().cmp(other.as_str()) as i64),
        _ => Value::Nil,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("plain", r#""plain""#)]
    #[case("a\"b", r#""a\"b""#)]
    #[case("line\n", r#""line\n""#)]
    #[case("#{x}", r#""\#{x}""#)]
    #[case("# ok", r##""# ok""##)]
    #[case("\u{1}", r#""\u0001""#)]
    #[case("\x1b", r#""\e""#)]
    fn test_string_inspect(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(string_inspect(text), expected);
    }

    #[rstest]
    #[case("foo", ":foo")]
    #[case("foo=", ":foo=")]
    #[case("empty?", ":empty?")]
    #[case("@name", ":@name")]
    #[case("<=>", ":<=>")]
    #[case("[]=", ":[]=")]
    #[case("two words", r#":"two words""#)]
    #[case("9lives", r#":"9lives""#)]
    fn test_symbol_inspect(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(symbol_inspect(name), expected);
    }

    #[rstest]
    #[case("42", 42)]
    #[case("  -17abc", -17)]
    #[case("1_000", 1000)]
    #[case("abc", 0)]
    #[case("", 0)]
    fn test_leading_integer(#[case] text: &str, #[case] expected: i64) {
        assert_eq!(leading_integer(text), expected);
    }

    #[test]
    fn test_string_hash_is_content_based() {
        assert_eq!(string_hash("key"), string_hash(&String::from("key")));
        assert_ne!(string_hash("key"), string_hash("kez"));
    }
}

//! Shared helpers for the integration tests
//!
//! Programs are written in the s-expression tree form; `_` is an absent
//! child, so `(call _ puts ...)` is a call with an implicit receiver.

#![allow(dead_code)]

use garnet_runtime::stdlib::CaptureBuffer;
use garnet_runtime::{Runtime, RuntimeError, Value, VmOptions};

pub use pretty_assertions::assert_eq;

/// Runtime whose output is captured
pub fn capturing_runtime() -> (Runtime, CaptureBuffer) {
    let buffer = CaptureBuffer::new();
    let runtime = Runtime::with_output(VmOptions::default(), buffer.writer());
    (runtime, buffer)
}

/// Evaluate a program that must succeed
pub fn eval(source: &str) -> Value {
    let (mut runtime, _) = capturing_runtime();
    match runtime.eval_sexp(source) {
        Ok(value) => value,
        Err(err) => panic!("program failed: {}\n{}", err, source),
    }
}

/// Evaluate a program and render the result with guest `inspect`
pub fn eval_inspect(source: &str) -> String {
    let (mut runtime, _) = capturing_runtime();
    match runtime.eval_sexp(source) {
        Ok(value) => runtime.inspect(&value),
        Err(err) => panic!("program failed: {}\n{}", err, source),
    }
}

/// Everything the program printed, whether or not it finished normally
pub fn eval_output(source: &str) -> String {
    let (mut runtime, buffer) = capturing_runtime();
    let _ = runtime.eval_sexp(source);
    buffer.contents()
}

/// Evaluate a program that must fail
pub fn eval_error(source: &str) -> RuntimeError {
    let (mut runtime, _) = capturing_runtime();
    match runtime.eval_sexp(source) {
        Ok(value) => panic!("expected an error, got {:?}\n{}", value, source),
        Err(err) => err,
    }
}

/// Assert that a program dies with an uncaught exception of `class`
pub fn assert_uncaught(source: &str, class: &str, message: &str) {
    let err = eval_error(source);
    assert_eq!(err.exception_class(), Some(class), "error was: {}", err);
    assert_eq!(err.exception_message(), Some(message), "error was: {}", err);
}

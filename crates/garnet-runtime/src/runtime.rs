//! Embedding API
//!
//! [`Runtime`] owns one VM and compiles each tree it is handed, so classes,
//! methods, constants and globals persist across evaluations.
//!
//! # Examples
//!
//! ```
//! use garnet_runtime::{Runtime, Value};
//!
//! let mut runtime = Runtime::new();
//! let result = runtime.eval_sexp("(call (lit 1) + (lit 2))").unwrap();
//! assert_eq!(result, Value::Integer(3));
//! ```

use crate::ast::{sexp, Node};
use crate::bytecode::{disasm, validator, CodeObject};
use crate::compiler;
use crate::error::{InternalError, RuntimeError};
use crate::stdlib::{self, OutputWriter};
use crate::value::Value;
use crate::vm::Vm;
use garnet_config::{Config, VmOptions};
use std::rc::Rc;
use tracing::debug;

/// File name recorded for trees that do not carry one
pub const DEFAULT_FILE: &str = "<input>";

/// A VM plus the compile pipeline in front of it
pub struct Runtime {
    vm: Vm,
}

impl Runtime {
    /// Runtime with default options writing to stdout
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        Self::with_output(options, stdlib::stdout_writer())
    }

    /// Runtime configured from `garnet.toml` / global config / environment
    pub fn with_config(config: &Config) -> Self {
        Self::with_options(config.vm_options())
    }

    /// Runtime whose `puts`/`print`/`p` go to `output`
    pub fn with_output(options: VmOptions, output: OutputWriter) -> Self {
        Self {
            vm: Vm::new(options, output),
        }
    }

    // ===== Compilation =====

    /// Compile a program, dumping and verifying according to the options
    pub fn compile(&self, node: &Node) -> Result<Rc<CodeObject>, RuntimeError> {
        let code = compiler::compile(node, DEFAULT_FILE)?;
        self.check(&code)?;
        Ok(code)
    }

    fn check(&self, code: &Rc<CodeObject>) -> Result<(), RuntimeError> {
        let options = self.vm.options();
        if options.dump_bytecode {
            debug!(code = %code.label(), "bytecode\n{}", disasm::disassemble(code));
        }
        if options.verify_bytecode {
            if let Err(errors) = validator::validate(code) {
                let report: Vec<String> = errors.iter().map(ToString::to_string).collect();
                return Err(InternalError::InvalidBytecode(report.join("; ")).into());
            }
        }
        Ok(())
    }

    // ===== Evaluation =====

    /// Compile and run a program with `main` as self
    pub fn eval(&mut self, node: &Node) -> Result<Value, RuntimeError> {
        let code = self.compile(node)?;
        self.vm.execute(&code)
    }

    /// Evaluate the s-expression form of a tree
    pub fn eval_sexp(&mut self, source: &str) -> Result<Value, RuntimeError> {
        let node = sexp::parse(source, DEFAULT_FILE)?;
        self.eval(&node)
    }

    /// Evaluate a tree serialized as JSON
    pub fn eval_json(&mut self, json: &str) -> Result<Value, RuntimeError> {
        let node: Node =
            serde_json::from_str(json).map_err(|err| RuntimeError::Input(err.to_string()))?;
        self.eval(&node)
    }

    /// Run a tree with a chosen receiver. A class receiver also becomes the
    /// target of `def` and constant assignment.
    pub fn eval_in(&mut self, node: &Node, self_value: Value) -> Result<Value, RuntimeError> {
        let code = compiler::compile_eval(node, DEFAULT_FILE)?;
        self.check(&code)?;
        self.vm.execute_in(&code, self_value)
    }

    // ===== Inspection =====

    /// Guest `inspect` text of a value
    pub fn inspect(&mut self, value: &Value) -> String {
        self.vm.inspect_value(value)
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.vm.global(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.vm.set_global(name, value);
    }

    pub fn vm(&mut self) -> &mut Vm {
        &mut self.vm
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::CaptureBuffer;
    use pretty_assertions::assert_eq;

    fn capturing() -> (Runtime, CaptureBuffer) {
        let buffer = CaptureBuffer::new();
        let runtime = Runtime::with_output(VmOptions::default(), buffer.writer());
        (runtime, buffer)
    }

    #[test]
    fn test_state_persists_across_evals() {
        let mut runtime = Runtime::new();
        runtime
            .eval_sexp("(defn twice (args x) (call (lvar x) * (lit 2)))")
            .unwrap();
        let result = runtime.eval_sexp("(call _ twice (lit 21))").unwrap();
        assert_eq!(result, Value::Integer(42));
    }

    #[test]
    fn test_output_is_captured() {
        let (mut runtime, buffer) = capturing();
        runtime.eval_sexp(r#"(call _ puts (str "hi") (lit 2))"#).unwrap();
        assert_eq!(buffer.contents(), "hi\n2\n");
    }

    #[test]
    fn test_eval_json() {
        let mut runtime = Runtime::new();
        let json = r#"{"kind": "call", "children": [{"kind": "lit", "children": [6]}, "*", {"kind": "lit", "children": [7]}]}"#;
        assert_eq!(runtime.eval_json(json).unwrap(), Value::Integer(42));
    }

    #[test]
    fn test_eval_json_rejects_malformed_input() {
        let mut runtime = Runtime::new();
        let err = runtime.eval_json("{not json").unwrap_err();
        assert!(matches!(err, RuntimeError::Input(_)));
    }

    #[test]
    fn test_uncaught_exception_reports_class_and_message() {
        let mut runtime = Runtime::new();
        let err = runtime.eval_sexp(r#"(call _ raise (str "boom"))"#).unwrap_err();
        assert_eq!(err.exception_class(), Some("RuntimeError"));
        assert_eq!(err.exception_message(), Some("boom"));
    }

    #[test]
    fn test_inspect_uses_guest_methods() {
        let mut runtime = Runtime::new();
        let value = runtime
            .eval_sexp(r#"(hash (sym a) (lit 1) (str "k") (array (lit 2) (nil)))"#)
            .unwrap();
        assert_eq!(runtime.inspect(&value), r#"{a: 1, "k" => [2, nil]}"#);
    }

    #[test]
    fn test_globals_are_shared_with_the_host() {
        let mut runtime = Runtime::new();
        runtime.set_global("$limit", Value::Integer(3));
        let result = runtime.eval_sexp("(call (gvar $limit) + (lit 1))").unwrap();
        assert_eq!(result, Value::Integer(4));
        runtime.eval_sexp("(gasgn $seen (true))").unwrap();
        assert_eq!(runtime.global("$seen"), Some(Value::True));
    }
}

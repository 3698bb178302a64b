//! Garnet Runtime - bytecode compiler and stack VM for a Ruby-like language
//!
//! This library provides:
//! - A syntax-tree interface fed by an external parser (Rust, JSON or s-expressions)
//! - Compilation to code objects with catch tables for non-local control flow
//! - A stack VM with closures, mixins, singleton classes and exceptions
//! - A minimal builtin class library

/// Garnet runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod error;
pub mod object;
pub mod runtime;
pub mod span;
pub mod stdlib;
pub mod symbol;
pub mod value;
pub mod vm;

pub use ast::{Child, Node};
pub use bytecode::{CodeObject, Op};
pub use error::{CompileError, InternalError, RuntimeError};
pub use object::{ClassId, ClassTable};
pub use runtime::Runtime;
pub use span::Span;
pub use stdlib::{CaptureBuffer, OutputWriter};
pub use symbol::Symbol;
pub use value::Value;
pub use vm::Vm;

pub use garnet_config::{Config, ConfigLoader, VmOptions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}

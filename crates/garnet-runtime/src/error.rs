//! Host-facing error types
//!
//! Guest-level exceptions never appear here while they can still be rescued;
//! they only surface as [`RuntimeError::Uncaught`] once the frame stack is
//! exhausted.

use crate::span::Span;
use thiserror::Error;

/// A malformed or unsupported AST node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{span}: {message}")]
pub struct CompileError {
    pub message: String,
    pub span: Span,
}

impl CompileError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Malformed bytecode or inconsistent frame/catch-table state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    #[error("operand stack underflow in {code} at pc {pc}")]
    StackUnderflow { code: String, pc: usize },

    #[error("pc {pc} out of range in {code}")]
    PcOutOfRange { code: String, pc: usize },

    #[error("local slot {slot} (depth {depth}) out of range")]
    BadLocal { slot: usize, depth: usize },

    #[error("{reason} signal escaped every frame")]
    UnhandledSignal { reason: String },

    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
}

/// Errors reported to the embedding host
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("internal VM error: {0}")]
    Internal(#[from] InternalError),

    #[error("{message} ({class})")]
    Uncaught {
        class: String,
        message: String,
        backtrace: Vec<String>,
    },

    #[error("invalid input: {0}")]
    Input(String),
}

impl RuntimeError {
    /// Class name of an uncaught guest exception
    pub fn exception_class(&self) -> Option<&str> {
        match self {
            RuntimeError::Uncaught { class, .. } => Some(class),
            _ => None,
        }
    }

    /// Message of an uncaught guest exception
    pub fn exception_message(&self) -> Option<&str> {
        match self {
            RuntimeError::Uncaught { message, .. } => Some(message),
            _ => None,
        }
    }
}

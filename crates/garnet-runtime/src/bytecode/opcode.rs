//! Instruction set
//!
//! Instructions are typed: each variant carries exactly the operands it needs,
//! including child code objects for definitions and literal blocks.

use super::CodeObject;
use crate::symbol::Symbol;
use crate::value::Value;
use std::rc::Rc;

/// How a constant reference is scoped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstScope {
    /// `Foo`: lexical chain, then ancestors of the innermost class
    Lexical,
    /// `expr::Foo`: pops the scope module
    Scoped,
    /// `::Foo`
    Top,
}

/// What a `DefineClass` instruction opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefineKind {
    /// `class Name < super`; `has_super` means the superclass is on the stack
    Class { has_super: bool },
    Module,
    /// `class << obj`; pops the object
    Singleton,
}

/// Whether a break/next/redo targets a loop or the enclosing block frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowScope {
    Loop,
    Block,
}

/// Operand of the `Throw` instruction. `level` counts rescue/ensure handler
/// frames between the throwing code and the code that owns the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowKind {
    /// Raise the exception on top of the stack
    Raise,
    /// Resume a reified unwind (or raise a plain exception) from an ensure handler
    Reraise,
    Break { level: usize, scope: ThrowScope },
    Next { level: usize, scope: ThrowScope },
    Redo { level: usize, scope: ThrowScope },
    Retry { level: usize },
    Return,
}

/// Call-site description shared by `Send` and `InvokeSuper`
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub name: Symbol,
    /// Number of argument slots on the stack (a splatted list counts as one)
    pub argc: usize,
    /// Implicit receiver: private methods are callable
    pub fcall: bool,
    /// The single argument slot is an array to spread
    pub splat: bool,
    /// A `&blk` value sits above the arguments
    pub block_arg: bool,
    /// Literal block attached to the call
    pub block: Option<Rc<CodeObject>>,
}

impl CallInfo {
    pub fn simple(name: impl Into<Symbol>, argc: usize) -> Self {
        Self {
            name: name.into(),
            argc,
            fcall: false,
            splat: false,
            block_arg: false,
            block: None,
        }
    }

    pub fn fcall(name: impl Into<Symbol>, argc: usize) -> Self {
        Self {
            fcall: true,
            ..Self::simple(name, argc)
        }
    }

    /// Stack slots consumed besides the receiver
    pub fn arg_slots(&self) -> usize {
        self.argc + usize::from(self.block_arg)
    }
}

#[derive(Debug, Clone)]
pub enum Op {
    // ===== Literals =====
    PutNil,
    PutTrue,
    PutFalse,
    PutSelf,
    /// Immediate literal (integer, float, symbol)
    PutObject(Value),
    /// Fresh mutable string
    PutString(Rc<str>),

    // ===== Stack =====
    Pop,
    Dup,
    Swap,
    /// Push a copy of the value `n` slots below the top
    TopN(usize),
    /// Overwrite the value `n` slots below the top with the top (no pop)
    SetN(usize),

    // ===== Variables =====
    GetLocal { slot: usize, depth: usize },
    /// Pops the value
    SetLocal { slot: usize, depth: usize },
    GetIvar(Symbol),
    SetIvar(Symbol),
    GetGlobal(Symbol),
    SetGlobal(Symbol),
    GetCvar(Symbol),
    SetCvar(Symbol),
    GetConst { name: Symbol, scope: ConstScope },
    /// Pops the value; a scoped store pops the scope module first
    SetConst { name: Symbol, scoped: bool },

    // ===== Collections =====
    NewArray(usize),
    /// Convert the top value to an array for spreading
    SplatArray,
    ConcatArray,
    /// Pops `n` values (key, value, key, value...)
    NewHash(usize),
    NewRange { exclusive: bool },
    /// Replace the top value by its `to_s` unless it already is a string
    ToS,
    ConcatStrings(usize),
    /// Destructure the top value. The prefix phase pushes the remainder
    /// array (if `rest`) then the first `count` elements so the first ends on
    /// top; the suffix phase (`post`) pushes the last `count` elements then the
    /// remainder.
    ExpandArray { count: usize, rest: bool, post: bool },

    // ===== Control =====
    Jump(usize),
    BranchIf(usize),
    BranchUnless(usize),

    // ===== Calls =====
    Send(Rc<CallInfo>),
    /// `zsuper` re-sends the current method's parameters; the compiler has
    /// already loaded them
    InvokeSuper { info: Rc<CallInfo>, zsuper: bool },
    InvokeBlock { argc: usize, splat: bool },
    /// Pops pattern then subject and pushes `pattern === subject`; with
    /// `splat` the pattern is an array of alternatives
    CheckMatch { splat: bool },

    // ===== Definitions =====
    /// Pushes the method name as a symbol; a singleton definition pops the receiver
    DefineMethod { name: Symbol, code: Rc<CodeObject>, singleton: bool },
    DefineClass { name: Symbol, code: Rc<CodeObject>, kind: DefineKind, scope: ConstScope },
    Alias { new_name: Symbol, old_name: Symbol },
    Undef(Symbol),
    /// Push whether keyword parameter `n` was supplied by the caller
    CheckKeyword(usize),

    // ===== Unwinding and exit =====
    Throw(ThrowKind),
    Leave,
    Nop,
}

impl Op {
    /// (values popped, values pushed)
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Op::PutNil
            | Op::PutTrue
            | Op::PutFalse
            | Op::PutSelf
            | Op::PutObject(_)
            | Op::PutString(_)
            | Op::GetLocal { .. }
            | Op::GetIvar(_)
            | Op::GetGlobal(_)
            | Op::GetCvar(_)
            | Op::CheckKeyword(_)
            | Op::Alias { .. }
            | Op::Undef(_) => (0, 1),
            Op::GetConst { scope, .. } => {
                if *scope == ConstScope::Scoped {
                    (1, 1)
                } else {
                    (0, 1)
                }
            }
            Op::Pop
            | Op::SetLocal { .. }
            | Op::SetIvar(_)
            | Op::SetGlobal(_)
            | Op::SetCvar(_)
            | Op::BranchIf(_)
            | Op::BranchUnless(_)
            | Op::Throw(_)
            | Op::Leave => (1, 0),
            Op::SetConst { scoped, .. } => (1 + usize::from(*scoped), 0),
            Op::Dup => (1, 2),
            Op::Swap => (2, 2),
            Op::TopN(n) => (n + 1, n + 2),
            Op::SetN(n) => (n + 1, n + 1),
            Op::NewArray(n) | Op::ConcatStrings(n) | Op::NewHash(n) => (*n, 1),
            Op::SplatArray | Op::ToS => (1, 1),
            Op::ConcatArray | Op::NewRange { .. } | Op::CheckMatch { .. } => (2, 1),
            Op::ExpandArray { count, rest, .. } => (1, count + usize::from(*rest)),
            Op::Jump(_) | Op::Nop => (0, 0),
            Op::Send(info) => (1 + info.arg_slots(), 1),
            Op::InvokeSuper { info, .. } => (info.arg_slots(), 1),
            Op::InvokeBlock { argc, .. } => (*argc, 1),
            Op::DefineMethod { singleton, .. } => (usize::from(*singleton), 1),
            Op::DefineClass { kind, scope, .. } => {
                let scoped = usize::from(*scope == ConstScope::Scoped);
                match kind {
                    DefineKind::Class { has_super } => (scoped + usize::from(*has_super), 1),
                    DefineKind::Module => (scoped, 1),
                    DefineKind::Singleton => (1, 1),
                }
            }
        }
    }

    /// Instructions after which control never falls through
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Jump(_) | Op::Throw(_) | Op::Leave)
    }

    /// Jump target, if any
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Op::Jump(t) | Op::BranchIf(t) | Op::BranchUnless(t) => Some(*t),
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::PutNil => "putnil",
            Op::PutTrue => "puttrue",
            Op::PutFalse => "putfalse",
            Op::PutSelf => "putself",
            Op::PutObject(_) => "putobject",
            Op::PutString(_) => "putstring",
            Op::Pop => "pop",
            Op::Dup => "dup",
            Op::Swap => "swap",
            Op::TopN(_) => "topn",
            Op::SetN(_) => "setn",
            Op::GetLocal { .. } => "getlocal",
            Op::SetLocal { .. } => "setlocal",
            Op::GetIvar(_) => "getivar",
            Op::SetIvar(_) => "setivar",
            Op::GetGlobal(_) => "getglobal",
            Op::SetGlobal(_) => "setglobal",
            Op::GetCvar(_) => "getcvar",
            Op::SetCvar(_) => "setcvar",
            Op::GetConst { .. } => "getconst",
            Op::SetConst { .. } => "setconst",
            Op::NewArray(_) => "newarray",
            Op::SplatArray => "splatarray",
            Op::ConcatArray => "concatarray",
            Op::NewHash(_) => "newhash",
            Op::NewRange { .. } => "newrange",
            Op::ToS => "tos",
            Op::ConcatStrings(_) => "concatstrings",
            Op::ExpandArray { .. } => "expandarray",
            Op::Jump(_) => "jump",
            Op::BranchIf(_) => "branchif",
            Op::BranchUnless(_) => "branchunless",
            Op::Send(_) => "send",
            Op::InvokeSuper { .. } => "invokesuper",
            Op::InvokeBlock { .. } => "invokeblock",
            Op::CheckMatch { .. } => "checkmatch",
            Op::DefineMethod { .. } => "definemethod",
            Op::DefineClass { .. } => "defineclass",
            Op::Alias { .. } => "alias",
            Op::Undef(_) => "undef",
            Op::CheckKeyword(_) => "checkkeyword",
            Op::Throw(_) => "throw",
            Op::Leave => "leave",
            Op::Nop => "nop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_effect_counts_receiver_and_block_arg() {
        let info = CallInfo {
            block_arg: true,
            ..CallInfo::simple("each", 2)
        };
        assert_eq!(Op::Send(Rc::new(info)).stack_effect(), (4, 1));
    }

    #[test]
    fn test_expand_array_effect() {
        let op = Op::ExpandArray {
            count: 2,
            rest: true,
            post: false,
        };
        assert_eq!(op.stack_effect(), (1, 3));
    }

    #[test]
    fn test_terminators() {
        assert!(Op::Leave.is_terminator());
        assert!(Op::Throw(ThrowKind::Return).is_terminator());
        assert!(!Op::BranchIf(3).is_terminator());
    }
}

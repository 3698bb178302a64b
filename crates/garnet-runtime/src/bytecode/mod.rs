//! Bytecode containers
//!
//! A [`CodeObject`] is the unit of compilation: one method, block, class
//! body, rescue/ensure handler, or top-level program. It owns its
//! instructions, its local-variable table, and a catch table of pc-range
//! handlers that drives every non-local control transfer. Code objects are
//! immutable once the compiler hands them out.

pub mod disasm;
pub mod opcode;
pub mod validator;

pub use opcode::{CallInfo, ConstScope, DefineKind, Op, ThrowKind, ThrowScope};

use crate::symbol::Symbol;
use std::cell::OnceCell;
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Main,
    Method,
    Block,
    Class,
    Rescue,
    Ensure,
    Eval,
}

impl CodeKind {
    /// Rescue and ensure handlers run in their own frame but share the
    /// owner's locals
    pub fn is_handler(self) -> bool {
        matches!(self, CodeKind::Rescue | CodeKind::Ensure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    Arg,
    Optional,
    Rest,
    Keyword,
    Block,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    pub name: Symbol,
    pub kind: LocalKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordParam {
    pub name: Symbol,
    pub slot: usize,
    pub required: bool,
}

/// Parameter layout. Parameters occupy the first local slots in canonical
/// order: required, optional, rest, keywords, block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSpec {
    pub required: usize,
    pub optional: usize,
    /// `opt_entries[k]` is the pc to start at when `k` optionals were supplied;
    /// it has `optional + 1` entries when there are optionals, else none
    pub opt_entries: Vec<usize>,
    pub rest: Option<usize>,
    pub keywords: Vec<KeywordParam>,
    pub block: Option<usize>,
    /// First pc after the default-value prologues; `redo` in a block restarts here
    pub body_start: usize,
}

impl ParamSpec {
    /// Guest-visible arity: negative when optional or rest parameters exist
    pub fn arity(&self) -> i64 {
        let required = self.required as i64;
        let has_required_kw = self.keywords.iter().any(|k| k.required);
        if self.optional > 0 || self.rest.is_some() {
            -(required + 1) - i64::from(has_required_kw)
        } else {
            required + i64::from(has_required_kw)
        }
    }

    /// Number of positional parameters a non-lambda block would spread an
    /// array argument across
    pub fn lead_count(&self) -> usize {
        self.required + self.optional + usize::from(self.rest.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchKind {
    Rescue,
    Ensure,
    Retry,
    Break,
    Next,
    Redo,
}

/// One pc-range handler. `start..end` is half-open; `cont` is a pc in the
/// owning code object, never in the handler.
#[derive(Debug, Clone)]
pub struct CatchEntry {
    pub kind: CatchKind,
    pub start: usize,
    pub end: usize,
    pub cont: usize,
    /// Handler body for rescue/ensure; identity tag for retry (the rescue
    /// handler) and for block breaks (the block code)
    pub handler: Option<Rc<CodeObject>>,
    /// Operand stack depth to restore in the owning frame
    pub sp: usize,
}

impl CatchEntry {
    pub fn covers(&self, pc: usize) -> bool {
        self.start <= pc && pc < self.end
    }

    /// Whether the entry's tag is exactly `tag`
    pub fn tagged(&self, tag: Option<&Rc<CodeObject>>) -> bool {
        match (&self.handler, tag) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: Op,
    pub line: u32,
}

pub struct CodeObject {
    pub name: Symbol,
    pub kind: CodeKind,
    pub file: Rc<str>,
    pub line: u32,
    pub instructions: Vec<Instruction>,
    pub locals: Vec<LocalVar>,
    pub params: ParamSpec,
    pub catch_table: Vec<CatchEntry>,
    pub(crate) parent: OnceCell<Weak<CodeObject>>,
}

impl CodeObject {
    pub fn parent(&self) -> Option<Rc<CodeObject>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    /// Nested code objects referenced by instructions or catch entries
    pub fn children(&self) -> Vec<Rc<CodeObject>> {
        let mut out: Vec<Rc<CodeObject>> = Vec::new();
        let mut add = |code: &Rc<CodeObject>| {
            if !out.iter().any(|c| Rc::ptr_eq(c, code)) {
                out.push(Rc::clone(code));
            }
        };
        for instr in &self.instructions {
            match &instr.op {
                Op::DefineMethod { code, .. } | Op::DefineClass { code, .. } => add(code),
                Op::Send(info) | Op::InvokeSuper { info, .. } => {
                    if let Some(block) = &info.block {
                        add(block);
                    }
                }
                _ => {}
            }
        }
        for entry in &self.catch_table {
            if let Some(handler) = &entry.handler {
                add(handler);
            }
        }
        out
    }

    /// Frame label used in backtraces: `foo`, `block in foo`, `<class:Foo>`
    pub fn label(&self) -> String {
        match self.kind {
            CodeKind::Block | CodeKind::Rescue | CodeKind::Ensure => {
                let prefix = match self.kind {
                    CodeKind::Block => "block",
                    CodeKind::Rescue => "rescue",
                    _ => "ensure",
                };
                let mut owner = self.parent();
                while let Some(code) = owner.clone() {
                    if code.kind.is_handler() || code.kind == CodeKind::Block {
                        owner = code.parent();
                    } else {
                        return format!("{} in {}", prefix, code.label());
                    }
                }
                format!("{} in {}", prefix, self.name)
            }
            CodeKind::Class => format!("<class:{}>", self.name),
            CodeKind::Main => "<main>".to_string(),
            CodeKind::Eval => "<eval>".to_string(),
            CodeKind::Method => self.name.to_string(),
        }
    }

    pub fn line_at(&self, pc: usize) -> u32 {
        self.instructions
            .get(pc)
            .or_else(|| self.instructions.last())
            .map_or(self.line, |i| i.line)
    }
}

impl fmt::Debug for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeObject")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("instructions", &self.instructions.len())
            .field("locals", &self.locals.len())
            .field("catch_table", &self.catch_table.len())
            .finish()
    }
}

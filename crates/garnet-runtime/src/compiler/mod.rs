//! AST to bytecode compiler
//!
//! One [`Compiler`] instance produces one [`CodeObject`]. Nested method,
//! block, class and handler bodies are compiled by child compilers that
//! borrow their parent, so local resolution and loop/handler context can
//! walk outward without copying.
//! - Every expression leaves exactly one value on the operand stack
//! - Statement sequences pop all values but the last
//! - Locals are resolved to `(slot, depth)` pairs at compile time; blocks
//!   and rescue/ensure handlers add one depth level each
//! - Control transfers that may leave the current code object compile to
//!   `throw` and are resolved by the VM through catch tables

mod control;
mod define;
mod emitter;
mod expr;

use crate::ast::{Child, Node};
use crate::bytecode::{CodeKind, CodeObject, LocalKind, LocalVar, Op, ParamSpec};
use crate::error::CompileError;
use crate::span::Span;
use crate::symbol::Symbol;
use emitter::{Emitter, Label};
use std::cell::{OnceCell, RefCell};
use std::rc::Rc;
use tracing::debug;

/// Compile a program; the result is the `<main>` code object
pub fn compile(node: &Node, file: &str) -> Result<Rc<CodeObject>, CompileError> {
    compile_as(node, file, CodeKind::Main, "<main>")
}

/// Compile code for `Runtime::eval_in`: runs with a caller-chosen receiver
pub fn compile_eval(node: &Node, file: &str) -> Result<Rc<CodeObject>, CompileError> {
    compile_as(node, file, CodeKind::Eval, "<eval>")
}

fn compile_as(
    node: &Node,
    file: &str,
    kind: CodeKind,
    name: &str,
) -> Result<Rc<CodeObject>, CompileError> {
    let file: Rc<str> = if node.file.is_empty() {
        Rc::from(file)
    } else {
        Rc::from(node.file.as_str())
    };
    let mut compiler = Compiler::new(None, kind, Symbol::new(name), file, node.line);
    compiler.compile_expr(node)?;
    compiler.emit(Op::Leave);
    compiler.finish()
}

/// Loop context for direct `next`/`redo` jumps
#[derive(Debug, Clone, Copy)]
pub(super) struct LoopContext {
    pub(super) redo: Label,
    pub(super) next: Label,
    /// Operand stack depth at loop entry
    pub(super) depth: usize,
    pub(super) ensure_depth: usize,
}

/// Where a `break`/`next`/`redo` lands, seen from the current code object
pub(super) enum JumpScope {
    /// A loop in this code object
    Loop { level: usize, context: Option<LoopContext> },
    /// The innermost enclosing block frame
    Block { level: usize },
}

/// Compiler state for one code object
pub struct Compiler<'p> {
    pub(super) parent: Option<&'p Compiler<'p>>,
    pub(super) kind: CodeKind,
    pub(super) name: Symbol,
    pub(super) file: Rc<str>,
    pub(super) line: u32,
    pub(super) locals: RefCell<Vec<LocalVar>>,
    pub(super) params: ParamSpec,
    pub(super) emitter: Emitter,
    pub(super) loops: Vec<LoopContext>,
    /// Number of enclosing `ensure` bodies being compiled in this code object
    pub(super) ensure_depth: usize,
    /// Start of the block body, for `redo` at block level
    pub(super) body_label: Option<Label>,
}

impl<'p> Compiler<'p> {
    pub(super) fn new(
        parent: Option<&'p Compiler<'p>>,
        kind: CodeKind,
        name: Symbol,
        file: Rc<str>,
        line: u32,
    ) -> Self {
        Self {
            parent,
            kind,
            name,
            file,
            line,
            locals: RefCell::new(Vec::new()),
            params: ParamSpec::default(),
            emitter: Emitter::new(line),
            loops: Vec::new(),
            ensure_depth: 0,
            body_label: None,
        }
    }

    /// Child compiler for a nested code object
    pub(super) fn child(&self, kind: CodeKind, name: Symbol, line: u32) -> Compiler<'_> {
        Compiler::new(Some(self), kind, name, Rc::clone(&self.file), line)
    }

    pub(super) fn error(&self, node: &Node, message: impl Into<String>) -> CompileError {
        CompileError::new(message, node.span(&self.file))
    }

    pub(super) fn emit(&mut self, op: Op) {
        self.emitter.emit(op);
    }

    /// Compile `node` so that it leaves exactly one value
    pub(super) fn compile_expr(&mut self, node: &Node) -> Result<(), CompileError> {
        let before = self.emitter.depth();
        self.emitter.set_line(node.line);
        self.compile_node(node)?;
        if !self.emitter.reachable() {
            self.emitter.assume_depth(before + 1);
        }
        Ok(())
    }

    /// Compile child `index` of `node`; an absent child compiles to `nil`
    pub(super) fn compile_child(&mut self, node: &Node, index: usize) -> Result<(), CompileError> {
        match node.child(index) {
            None | Some(Child::Nil) => {
                self.emit(Op::PutNil);
                Ok(())
            }
            Some(Child::Node(inner)) => self.compile_expr(inner),
            Some(_) => Err(self.error(node, format!("malformed {}: expected a node", node.kind))),
        }
    }

    /// Statement sequence: every value but the last is popped
    pub(super) fn compile_sequence<'n>(
        &mut self,
        statements: impl Iterator<Item = &'n Node>,
    ) -> Result<(), CompileError> {
        let mut first = true;
        for statement in statements {
            if !first {
                self.emit(Op::Pop);
            }
            self.compile_expr(statement)?;
            first = false;
        }
        if first {
            self.emit(Op::PutNil);
        }
        Ok(())
    }

    /// Name child `index`: a bare name, or a `(sym x)`/`(str x)` node
    pub(super) fn name_child(&self, node: &Node, index: usize) -> Result<Symbol, CompileError> {
        match node.child(index) {
            Some(Child::Text(text)) => Ok(Symbol::new(text)),
            Some(Child::Node(inner)) if inner.is("sym") || inner.is("str") => inner
                .text(0)
                .map(Symbol::new)
                .ok_or_else(|| self.error(node, format!("malformed {}: empty name", node.kind))),
            _ => Err(self.error(node, format!("malformed {}: expected a name", node.kind))),
        }
    }

    // ===== Locals =====

    /// Blocks and handlers see the locals of the code they are nested in
    fn sees_parent_locals(&self) -> bool {
        matches!(self.kind, CodeKind::Block | CodeKind::Rescue | CodeKind::Ensure)
    }

    pub(super) fn resolve_local(&self, name: &str) -> Option<(usize, usize)> {
        if let Some(slot) = self
            .locals
            .borrow()
            .iter()
            .position(|local| local.name.as_str() == name)
        {
            return Some((slot, 0));
        }
        match self.parent {
            Some(parent) if self.sees_parent_locals() => {
                parent.resolve_local(name).map(|(slot, depth)| (slot, depth + 1))
            }
            _ => None,
        }
    }

    /// Resolve `name`, declaring it if unknown. Handlers declare in the
    /// code that owns them, so rescue-clause locals outlive the clause.
    pub(super) fn declare_local(&self, name: &str) -> (usize, usize) {
        if let Some(found) = self.resolve_local(name) {
            return found;
        }
        match self.parent {
            Some(parent) if self.kind.is_handler() => {
                let (slot, depth) = parent.declare_local(name);
                (slot, depth + 1)
            }
            _ => (self.add_local(name, LocalKind::Plain), 0),
        }
    }

    /// Add a local to this code object without looking outward (parameters)
    pub(super) fn add_local(&self, name: &str, kind: LocalKind) -> usize {
        let mut locals = self.locals.borrow_mut();
        locals.push(LocalVar {
            name: Symbol::new(name),
            kind,
        });
        locals.len() - 1
    }

    // ===== Context walks =====

    /// Innermost loop or block a `break`/`next`/`redo` refers to; handler
    /// code objects between are counted as levels
    pub(super) fn jump_scope(&self) -> Option<JumpScope> {
        if let Some(context) = self.loops.last() {
            return Some(JumpScope::Loop {
                level: 0,
                context: Some(*context),
            });
        }
        let mut level = 0;
        let mut current = self;
        loop {
            if !current.loops.is_empty() {
                return Some(JumpScope::Loop {
                    level,
                    context: None,
                });
            }
            match current.kind {
                CodeKind::Block => return Some(JumpScope::Block { level }),
                CodeKind::Rescue | CodeKind::Ensure => {
                    level += 1;
                    current = current.parent?;
                }
                _ => return None,
            }
        }
    }

    /// Handler levels between here and the rescue handler a `retry` restarts
    pub(super) fn retry_level(&self) -> Option<usize> {
        let mut level = 0;
        let mut current = self;
        loop {
            match current.kind {
                CodeKind::Rescue => return Some(level),
                CodeKind::Ensure => {
                    level += 1;
                    current = current.parent?;
                }
                _ => return None,
            }
        }
    }

    /// Code kind that owns this code, skipping handlers
    pub(super) fn owner_kind(&self) -> CodeKind {
        let mut current = self;
        while current.kind.is_handler() {
            match current.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current.kind
    }

    /// Nearest enclosing method compiler, through blocks and handlers
    pub(super) fn method_compiler(&self) -> Option<&Compiler<'p>> {
        let mut current = self;
        loop {
            match current.kind {
                CodeKind::Method => return Some(current),
                CodeKind::Block | CodeKind::Rescue | CodeKind::Ensure => {
                    current = current.parent?;
                }
                _ => return None,
            }
        }
    }

    // ===== Finish =====

    pub(super) fn finish(self) -> Result<Rc<CodeObject>, CompileError> {
        let span = Span::new(Rc::clone(&self.file), self.line);
        let (instructions, catch_table) = self.emitter.finish().map_err(|label| {
            CompileError::new(format!("label {} was never placed", label), span)
        })?;
        let code = Rc::new(CodeObject {
            name: self.name,
            kind: self.kind,
            file: self.file,
            line: self.line,
            instructions,
            locals: self.locals.into_inner(),
            params: self.params,
            catch_table,
            parent: OnceCell::new(),
        });
        for child in code.children() {
            let _ = child.parent.set(Rc::downgrade(&code));
        }
        debug!(
            code = %code.name,
            kind = ?code.kind,
            instructions = code.instructions.len(),
            catch_entries = code.catch_table.len(),
            "compiled code object"
        );
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::sexp;
    use crate::bytecode::{validator, CatchKind, ThrowKind, ThrowScope};
    use pretty_assertions::assert_eq;

    fn compile_source(source: &str) -> Rc<CodeObject> {
        let node = sexp::parse(source, "test.rb").unwrap();
        let code = compile(&node, "test.rb").expect("compilation failed");
        validator::validate(&code).expect("invalid bytecode");
        code
    }

    fn compile_error(source: &str) -> CompileError {
        let node = sexp::parse(source, "test.rb").unwrap();
        compile(&node, "test.rb").unwrap_err()
    }

    fn ops(code: &CodeObject) -> Vec<&'static str> {
        code.instructions.iter().map(|i| i.op.mnemonic()).collect()
    }

    #[test]
    fn test_sequence_pops_all_but_last() {
        let code = compile_source("(lasgn a (lit 1)) (lasgn b (lit 2)) (array (lvar a) (lvar b))");
        assert_eq!(
            ops(&code),
            vec![
                "putobject", "dup", "setlocal", "pop", "putobject", "dup", "setlocal", "pop",
                "getlocal", "getlocal", "newarray", "leave"
            ]
        );
        assert_eq!(code.locals.len(), 2);
    }

    #[test]
    fn test_block_locals_resolve_with_depth() {
        let code = compile_source("(lasgn x (lit 1)) (iter (call _ loop) (args) (lasgn x (lit 2)))");
        let block = code.children().remove(0);
        assert!(block
            .instructions
            .iter()
            .any(|i| matches!(i.op, Op::SetLocal { slot: 0, depth: 1 })));
        assert!(block.locals.is_empty());
    }

    #[test]
    fn test_rescue_locals_belong_to_owner() {
        let code = compile_source(
            "(rescue (call _ foo) (resbody (array) _ (lasgn y (lit 1)))) (lvar y)",
        );
        assert!(code.locals.iter().any(|l| l.name.as_str() == "y"));
        let handler = code.children().remove(0);
        assert_eq!(handler.kind, CodeKind::Rescue);
        assert_eq!(handler.locals.len(), 1);
    }

    #[test]
    fn test_while_registers_break_next_redo_entries() {
        let code = compile_source("(while (true) (break (lit 3)))");
        let kinds: Vec<CatchKind> = code.catch_table.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![CatchKind::Break, CatchKind::Next, CatchKind::Redo]);
        assert!(code.instructions.iter().any(|i| matches!(
            i.op,
            Op::Throw(ThrowKind::Break {
                level: 0,
                scope: ThrowScope::Loop
            })
        )));
    }

    #[test]
    fn test_return_in_method_without_ensure_is_leave() {
        let code = compile_source("(defn f (args) (return (lit 1)))");
        let method = code.children().remove(0);
        assert!(!method
            .instructions
            .iter()
            .any(|i| matches!(i.op, Op::Throw(_))));
    }

    #[test]
    fn test_return_inside_ensure_throws() {
        let code = compile_source("(defn f (args) (ensure (return (lit 1)) (lit 2)))");
        let method = code.children().remove(0);
        assert!(method
            .instructions
            .iter()
            .any(|i| matches!(i.op, Op::Throw(ThrowKind::Return))));
    }

    #[test]
    fn test_unknown_node_kind_is_error_with_position() {
        let err = compile_error("(block\n (nil)\n (frobnicate 1))");
        assert_eq!(err.span.line, 3);
        assert!(err.message.contains("frobnicate"));
    }

    #[test]
    fn test_misplaced_jumps_are_errors() {
        assert!(compile_error("(break)").message.contains("break"));
        assert!(compile_error("(retry)").message.contains("retry"));
        assert!(compile_error("(class Foo _ (return))").message.contains("return"));
    }
}

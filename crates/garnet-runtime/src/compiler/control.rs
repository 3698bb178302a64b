//! Control flow: conditionals, loops, case, jumps, rescue and ensure

use super::{Compiler, JumpScope, LoopContext};
use crate::ast::{Child, Node};
use crate::bytecode::{CatchKind, CodeKind, ConstScope, LocalKind, Op, ThrowKind, ThrowScope};
use crate::error::CompileError;
use crate::symbol::Symbol;
use std::rc::Rc;

impl Compiler<'_> {
    pub(super) fn compile_and_or(&mut self, node: &Node) -> Result<(), CompileError> {
        let end = self.emitter.label();
        self.compile_child(node, 0)?;
        self.emit(Op::Dup);
        if node.is("and") {
            self.emitter.emit_jump(Op::BranchUnless, end);
        } else {
            self.emitter.emit_jump(Op::BranchIf, end);
        }
        self.emit(Op::Pop);
        self.compile_child(node, 1)?;
        self.emitter.place(end);
        Ok(())
    }

    pub(super) fn compile_if(&mut self, node: &Node) -> Result<(), CompileError> {
        let else_label = self.emitter.label();
        let end = self.emitter.label();
        self.compile_child(node, 0)?;
        self.emitter.emit_jump(Op::BranchUnless, else_label);
        self.compile_child(node, 1)?;
        self.emitter.emit_jump(Op::Jump, end);
        self.emitter.place(else_label);
        self.compile_child(node, 2)?;
        self.emitter.place(end);
        Ok(())
    }

    /// `while`/`until`. The body and condition are covered by break, next
    /// and redo entries; the loop value is `nil` unless a break carries one.
    ///
    /// ```text
    /// start:     jump next        (omitted for post-condition loops)
    /// redo:      <body> pop
    /// next:      <cond> branchif redo
    /// cover_end: putnil
    /// end:
    /// ```
    pub(super) fn compile_loop(&mut self, node: &Node) -> Result<(), CompileError> {
        let post = match node.child(2) {
            None | Some(Child::Nil) => false,
            Some(Child::Text(marker)) if marker == "post" => true,
            Some(_) => {
                return Err(self.error(
                    node,
                    format!("malformed {}: third child must be the post marker", node.kind),
                ))
            }
        };
        let depth = self.emitter.depth();
        let start = self.emitter.label();
        let redo = self.emitter.label();
        let next = self.emitter.label();
        let cover_end = self.emitter.label();
        let end = self.emitter.label();

        self.emitter.place(start);
        if !post {
            self.emitter.emit_jump(Op::Jump, next);
        }
        self.emitter.place(redo);
        self.loops.push(LoopContext {
            redo,
            next,
            depth,
            ensure_depth: self.ensure_depth,
        });
        self.compile_child(node, 1)?;
        self.emit(Op::Pop);
        self.emitter.place(next);
        self.compile_child(node, 0)?;
        if node.is("while") {
            self.emitter.emit_jump(Op::BranchIf, redo);
        } else {
            self.emitter.emit_jump(Op::BranchUnless, redo);
        }
        self.loops.pop();
        self.emitter.place(cover_end);
        self.emit(Op::PutNil);
        self.emitter.place(end);

        self.emitter
            .add_catch(CatchKind::Break, start, cover_end, end, None, depth);
        self.emitter
            .add_catch(CatchKind::Next, start, cover_end, next, None, depth);
        self.emitter
            .add_catch(CatchKind::Redo, start, cover_end, redo, None, depth);
        Ok(())
    }

    /// `case`: the subject is evaluated once and tested with `pattern === subject`
    pub(super) fn compile_case(&mut self, node: &Node) -> Result<(), CompileError> {
        let has_subject = !matches!(node.child(0), None | Some(Child::Nil));
        let mut whens = Vec::new();
        let mut else_body = None;
        for child in node.children.iter().skip(1) {
            match child {
                Child::Node(when) if when.is("when") => whens.push(&**when),
                Child::Node(other) => else_body = Some(&**other),
                Child::Nil => {}
                _ => return Err(self.error(node, "malformed case: unexpected child")),
            }
        }

        let end = self.emitter.label();
        if has_subject {
            self.compile_child(node, 0)?;
        }
        let mut arms = Vec::with_capacity(whens.len());
        for when in &whens {
            let arm = self.emitter.label();
            let patterns = when
                .node(0)
                .filter(|p| p.is("array"))
                .ok_or_else(|| self.error(when, "malformed when: expected (array patterns...)"))?;
            for pattern in patterns.nodes_from(0) {
                let splat = pattern.is("splat");
                let pattern = if splat {
                    pattern
                        .node(0)
                        .ok_or_else(|| self.error(pattern, "malformed splat: expected a value"))?
                } else {
                    pattern
                };
                if has_subject {
                    self.emit(Op::Dup);
                    self.compile_expr(pattern)?;
                    self.emit(Op::CheckMatch { splat });
                } else {
                    self.compile_expr(pattern)?;
                }
                self.emitter.emit_jump(Op::BranchIf, arm);
            }
            arms.push(arm);
        }

        if has_subject {
            self.emit(Op::Pop);
        }
        match else_body {
            Some(body) => self.compile_expr(body)?,
            None => self.emit(Op::PutNil),
        }
        self.emitter.emit_jump(Op::Jump, end);

        for (when, arm) in whens.iter().zip(arms) {
            self.emitter.place(arm);
            if has_subject {
                self.emit(Op::Pop);
            }
            self.compile_sequence(when.nodes_from(1))?;
            self.emitter.emit_jump(Op::Jump, end);
        }
        self.emitter.place(end);
        Ok(())
    }

    // ===== Jumps =====

    pub(super) fn compile_break(&mut self, node: &Node) -> Result<(), CompileError> {
        let scope = self
            .jump_scope()
            .ok_or_else(|| self.error(node, "Invalid break: not inside a loop or block"))?;
        self.compile_child(node, 0)?;
        let (level, scope) = match scope {
            JumpScope::Loop { level, .. } => (level, ThrowScope::Loop),
            JumpScope::Block { level } => (level, ThrowScope::Block),
        };
        self.emit(Op::Throw(ThrowKind::Break { level, scope }));
        Ok(())
    }

    pub(super) fn compile_next(&mut self, node: &Node) -> Result<(), CompileError> {
        let scope = self
            .jump_scope()
            .ok_or_else(|| self.error(node, "Invalid next: not inside a loop or block"))?;
        self.compile_child(node, 0)?;
        match scope {
            JumpScope::Loop {
                context: Some(context),
                ..
            } if context.ensure_depth == self.ensure_depth => {
                self.pop_to(context.depth);
                self.emitter.emit_jump(Op::Jump, context.next);
            }
            JumpScope::Block { level: 0 } if self.ensure_depth == 0 => {
                self.emit(Op::Leave);
            }
            JumpScope::Loop { level, .. } => self.emit(Op::Throw(ThrowKind::Next {
                level,
                scope: ThrowScope::Loop,
            })),
            JumpScope::Block { level } => self.emit(Op::Throw(ThrowKind::Next {
                level,
                scope: ThrowScope::Block,
            })),
        }
        Ok(())
    }

    pub(super) fn compile_redo(&mut self, node: &Node) -> Result<(), CompileError> {
        let scope = self
            .jump_scope()
            .ok_or_else(|| self.error(node, "Invalid redo: not inside a loop or block"))?;
        match (scope, self.body_label) {
            (
                JumpScope::Loop {
                    context: Some(context),
                    ..
                },
                _,
            ) if context.ensure_depth == self.ensure_depth => {
                self.pop_to(context.depth);
                self.emitter.emit_jump(Op::Jump, context.redo);
            }
            (JumpScope::Block { level: 0 }, Some(body)) if self.ensure_depth == 0 => {
                self.pop_to(0);
                self.emitter.emit_jump(Op::Jump, body);
            }
            (scope, _) => {
                let (level, scope) = match scope {
                    JumpScope::Loop { level, .. } => (level, ThrowScope::Loop),
                    JumpScope::Block { level } => (level, ThrowScope::Block),
                };
                self.emit(Op::PutNil);
                self.emit(Op::Throw(ThrowKind::Redo { level, scope }));
            }
        }
        Ok(())
    }

    pub(super) fn compile_retry(&mut self, node: &Node) -> Result<(), CompileError> {
        let level = self
            .retry_level()
            .ok_or_else(|| self.error(node, "Invalid retry: not inside a rescue clause"))?;
        self.emit(Op::PutNil);
        self.emit(Op::Throw(ThrowKind::Retry { level }));
        Ok(())
    }

    pub(super) fn compile_return(&mut self, node: &Node) -> Result<(), CompileError> {
        if self.owner_kind() == CodeKind::Class {
            return Err(self.error(node, "Invalid return in class/module body"));
        }
        self.compile_child(node, 0)?;
        let direct = matches!(self.kind, CodeKind::Method | CodeKind::Main | CodeKind::Eval);
        if direct && self.ensure_depth == 0 {
            self.emit(Op::Leave);
        } else {
            self.emit(Op::Throw(ThrowKind::Return));
        }
        Ok(())
    }

    /// Keep the top value, drop everything above `depth`
    fn pop_to(&mut self, depth: usize) {
        let current = self.emitter.depth();
        for _ in depth..current {
            self.emit(Op::Pop);
        }
    }

    // ===== Exceptions =====

    /// `begin/rescue/else`
    ///
    /// ```text
    /// start:  <body>
    /// end:    nop          <- owner pc while the handler runs
    /// after:  pop <else>   (only with an else clause)
    /// cont:                <- handler value lands here
    /// ```
    ///
    /// A rescue entry covers `start..end`; a retry entry covers the `nop`
    /// so a retry from the handler restarts at `start`.
    pub(super) fn compile_rescue(&mut self, node: &Node) -> Result<(), CompileError> {
        let mut clauses = Vec::new();
        let mut else_body = None;
        for child in node.children.iter().skip(1) {
            match child {
                Child::Node(clause) if clause.is("resbody") => clauses.push(&**clause),
                Child::Node(other) => else_body = Some(&**other),
                Child::Nil => {}
                _ => return Err(self.error(node, "malformed rescue: unexpected child")),
            }
        }

        let depth = self.emitter.depth();
        let start = self.emitter.label();
        let end = self.emitter.label();
        let after = self.emitter.label();
        let cont = self.emitter.label();

        self.emitter.place(start);
        self.compile_child(node, 0)?;
        self.emitter.place(end);
        self.emit(Op::Nop);
        self.emitter.place(after);
        if let Some(body) = else_body {
            self.emit(Op::Pop);
            self.compile_expr(body)?;
        }
        self.emitter.place(cont);

        let handler = self.compile_rescue_handler(node, &clauses)?;
        self.emitter.add_catch(
            CatchKind::Rescue,
            start,
            end,
            cont,
            Some(Rc::clone(&handler)),
            depth,
        );
        self.emitter
            .add_catch(CatchKind::Retry, end, after, start, Some(handler), depth);
        Ok(())
    }

    /// Every clause in one handler: test the exception in slot 0 against
    /// each clause's patterns, run the first match, re-raise if none match
    fn compile_rescue_handler(
        &self,
        node: &Node,
        clauses: &[&Node],
    ) -> Result<Rc<crate::bytecode::CodeObject>, CompileError> {
        let mut handler = self.child(CodeKind::Rescue, self.name.clone(), node.line);
        handler.add_local("$!", LocalKind::Plain);
        let exception = Op::GetLocal { slot: 0, depth: 0 };

        for clause in clauses {
            let body = handler.emitter.label();
            let next_clause = handler.emitter.label();
            let patterns: Vec<&Node> = match clause.node(0) {
                Some(list) if list.is("array") => list.nodes_from(0).collect(),
                None => Vec::new(),
                Some(_) => {
                    return Err(handler.error(clause, "malformed resbody: expected (array patterns...)"))
                }
            };
            if patterns.is_empty() {
                handler.emit(exception.clone());
                handler.emit(Op::GetConst {
                    name: Symbol::new("StandardError"),
                    scope: ConstScope::Top,
                });
                handler.emit(Op::CheckMatch { splat: false });
                handler.emitter.emit_jump(Op::BranchIf, body);
            }
            for pattern in patterns {
                handler.emit(exception.clone());
                if pattern.is("splat") {
                    handler.compile_child(pattern, 0)?;
                    handler.emit(Op::CheckMatch { splat: true });
                } else {
                    handler.compile_expr(pattern)?;
                    handler.emit(Op::CheckMatch { splat: false });
                }
                handler.emitter.emit_jump(Op::BranchIf, body);
            }
            handler.emitter.emit_jump(Op::Jump, next_clause);

            handler.emitter.place(body);
            match clause.child(1) {
                Some(Child::Text(name)) => {
                    handler.emit(exception.clone());
                    let (slot, depth) = handler.declare_local(name);
                    handler.emit(Op::SetLocal { slot, depth });
                }
                Some(Child::Node(target)) => {
                    handler.emit(exception.clone());
                    handler.compile_assign_target(target)?;
                }
                _ => {}
            }
            handler.compile_sequence(clause.nodes_from(2))?;
            handler.emit(Op::Leave);
            handler.emitter.place(next_clause);
        }
        handler.emit(exception);
        handler.emit(Op::Throw(ThrowKind::Raise));
        handler.finish()
    }

    /// `begin/ensure`: the ensure body runs inline on the normal path and in
    /// a handler that re-raises the reified unwind on every other path
    ///
    /// ```text
    /// start: <body>
    /// end:   <ensure body> pop
    /// ```
    pub(super) fn compile_ensure(&mut self, node: &Node) -> Result<(), CompileError> {
        let depth = self.emitter.depth();
        let start = self.emitter.label();
        let end = self.emitter.label();

        self.emitter.place(start);
        self.ensure_depth += 1;
        let body = self.compile_child(node, 0);
        self.ensure_depth -= 1;
        body?;
        self.emitter.place(end);
        self.compile_child(node, 1)?;
        self.emit(Op::Pop);

        let handler = {
            let mut handler = self.child(CodeKind::Ensure, self.name.clone(), node.line);
            handler.add_local("$unwind", LocalKind::Plain);
            handler.compile_child(node, 1)?;
            handler.emit(Op::Pop);
            handler.emit(Op::GetLocal { slot: 0, depth: 0 });
            handler.emit(Op::Throw(ThrowKind::Reraise));
            handler.finish()?
        };
        self.emitter
            .add_catch(CatchKind::Ensure, start, end, end, Some(handler), depth);
        Ok(())
    }
}

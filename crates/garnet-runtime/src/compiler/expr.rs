//! Expression compilation: literals, variables, assignment and calls

use super::Compiler;
use crate::ast::{Child, Node};
use crate::bytecode::{CallInfo, CatchKind, CodeObject, ConstScope, Op};
use crate::error::CompileError;
use crate::symbol::Symbol;
use crate::value::Value;
use std::rc::Rc;

/// Argument list shape after compilation
pub(super) struct ArgShape {
    pub(super) argc: usize,
    pub(super) splat: bool,
    pub(super) block_arg: bool,
}

/// Child slots of fixed-shape node kinds; `None` for variadic kinds
fn max_children(kind: &str) -> Option<usize> {
    let max = match kind {
        "nil" | "true" | "false" | "self" | "zsuper" | "redo" | "retry" => 0,
        "lit" | "str" | "sym" | "lvar" | "ivar" | "gvar" | "cvar" | "const" | "colon3" | "not"
        | "break" | "next" | "return" | "splat" | "block_pass" => 1,
        "dot2" | "dot3" | "colon2" | "lasgn" | "iasgn" | "gasgn" | "cvasgn" | "cdecl" | "and"
        | "or" | "masgn" | "op_asgn_or" | "op_asgn_and" | "lambda" | "ensure" | "module"
        | "sclass" | "alias" => 2,
        "if" | "while" | "until" | "iter" | "defn" | "class" => 3,
        "defs" => 4,
        _ => return None,
    };
    Some(max)
}

impl Compiler<'_> {
    pub(super) fn compile_node(&mut self, node: &Node) -> Result<(), CompileError> {
        if let Some(max) = max_children(&node.kind) {
            if node.children.len() > max {
                return Err(self.error(
                    node,
                    format!(
                        "malformed {}: expected at most {} children, found {}",
                        node.kind,
                        max,
                        node.children.len()
                    ),
                ));
            }
        }
        match node.kind.as_str() {
            "block" | "begin" => self.compile_sequence(node.nodes_from(0)),
            "nil" => {
                self.emit(Op::PutNil);
                Ok(())
            }
            "true" => {
                self.emit(Op::PutTrue);
                Ok(())
            }
            "false" => {
                self.emit(Op::PutFalse);
                Ok(())
            }
            "self" => {
                self.emit(Op::PutSelf);
                Ok(())
            }
            "lit" => self.compile_lit(node),
            "str" => {
                let text = node.text(0).unwrap_or_default();
                self.emit(Op::PutString(Rc::from(text)));
                Ok(())
            }
            "sym" => {
                let name = self.name_child(node, 0)?;
                self.emit(Op::PutObject(Value::Symbol(name)));
                Ok(())
            }
            "dstr" => self.compile_dstr(node),
            "array" => {
                let shape = self.compile_arg_list(node.nodes_from(0).collect())?;
                if !shape.splat {
                    self.emit(Op::NewArray(shape.argc));
                }
                Ok(())
            }
            "hash" => {
                let pairs: Vec<&Node> = node.nodes_from(0).collect();
                if pairs.len() % 2 != 0 {
                    return Err(self.error(node, "malformed hash: odd number of children"));
                }
                for item in &pairs {
                    self.compile_expr(item)?;
                }
                self.emit(Op::NewHash(pairs.len()));
                Ok(())
            }
            "dot2" | "dot3" => {
                self.compile_child(node, 0)?;
                self.compile_child(node, 1)?;
                self.emit(Op::NewRange {
                    exclusive: node.is("dot3"),
                });
                Ok(())
            }
            "lvar" => self.compile_lvar(node),
            "ivar" => {
                let name = self.name_child(node, 0)?;
                self.emit(Op::GetIvar(name));
                Ok(())
            }
            "gvar" => {
                let name = self.name_child(node, 0)?;
                self.emit(Op::GetGlobal(name));
                Ok(())
            }
            "cvar" => {
                let name = self.name_child(node, 0)?;
                self.emit(Op::GetCvar(name));
                Ok(())
            }
            "const" => {
                let name = self.name_child(node, 0)?;
                self.emit(Op::GetConst {
                    name,
                    scope: ConstScope::Lexical,
                });
                Ok(())
            }
            "colon2" => {
                self.compile_child(node, 0)?;
                let name = self.name_child(node, 1)?;
                self.emit(Op::GetConst {
                    name,
                    scope: ConstScope::Scoped,
                });
                Ok(())
            }
            "colon3" => {
                let name = self.name_child(node, 0)?;
                self.emit(Op::GetConst {
                    name,
                    scope: ConstScope::Top,
                });
                Ok(())
            }
            "lasgn" | "iasgn" | "gasgn" | "cvasgn" | "cdecl" => self.compile_assign(node),
            "masgn" => self.compile_masgn(node),
            "op_asgn_or" | "op_asgn_and" => self.compile_op_asgn(node),
            "attrasgn" => self.compile_attrasgn(node),
            "call" => self.compile_call(node, None),
            "iter" => self.compile_iter(node),
            "lambda" => self.compile_lambda(node),
            "yield" => self.compile_yield(node),
            "super" | "zsuper" => self.compile_super(node, None),
            "and" | "or" => self.compile_and_or(node),
            "not" => {
                self.compile_child(node, 0)?;
                self.emit(Op::Send(Rc::new(CallInfo::simple("!", 0))));
                Ok(())
            }
            "if" => self.compile_if(node),
            "while" | "until" => self.compile_loop(node),
            "case" => self.compile_case(node),
            "break" => self.compile_break(node),
            "next" => self.compile_next(node),
            "redo" => self.compile_redo(node),
            "retry" => self.compile_retry(node),
            "return" => self.compile_return(node),
            "rescue" => self.compile_rescue(node),
            "ensure" => self.compile_ensure(node),
            "defn" | "defs" => self.compile_def(node),
            "class" | "module" | "sclass" => self.compile_class(node),
            "alias" => {
                let new_name = self.name_child(node, 0)?;
                let old_name = self.name_child(node, 1)?;
                self.emit(Op::Alias { new_name, old_name });
                Ok(())
            }
            "undef" => {
                let count = node.children.len();
                if count == 0 {
                    return Err(self.error(node, "malformed undef: no names"));
                }
                for index in 0..count {
                    if index > 0 {
                        self.emit(Op::Pop);
                    }
                    let name = self.name_child(node, index)?;
                    self.emit(Op::Undef(name));
                }
                Ok(())
            }
            "splat" | "block_pass" => {
                Err(self.error(node, format!("unexpected {} outside an argument list", node.kind)))
            }
            other => Err(self.error(node, format!("unknown node kind '{}'", other))),
        }
    }

    fn compile_lit(&mut self, node: &Node) -> Result<(), CompileError> {
        let value = match node.child(0) {
            Some(Child::Int(i)) => Value::Integer(*i),
            Some(Child::Float(f)) => Value::Float(*f),
            _ => return Err(self.error(node, "malformed lit: expected a number")),
        };
        self.emit(Op::PutObject(value));
        Ok(())
    }

    fn compile_dstr(&mut self, node: &Node) -> Result<(), CompileError> {
        let mut count = 0;
        for child in &node.children {
            match child {
                Child::Text(text) => self.emit(Op::PutString(Rc::from(text.as_str()))),
                Child::Node(part) if part.is("str") => self.compile_expr(part)?,
                Child::Node(part) => {
                    self.compile_expr(part)?;
                    self.emit(Op::ToS);
                }
                Child::Nil => continue,
                _ => return Err(self.error(node, "malformed dstr part")),
            }
            count += 1;
        }
        self.emit(Op::ConcatStrings(count));
        Ok(())
    }

    /// A name that was never assigned is a method call on self
    fn compile_lvar(&mut self, node: &Node) -> Result<(), CompileError> {
        let name = self.name_child(node, 0)?;
        match self.resolve_local(name.as_str()) {
            Some((slot, depth)) => self.emit(Op::GetLocal { slot, depth }),
            None => {
                self.emit(Op::PutSelf);
                self.emit(Op::Send(Rc::new(CallInfo::fcall(name, 0))));
            }
        }
        Ok(())
    }

    // ===== Assignment =====

    fn compile_assign(&mut self, node: &Node) -> Result<(), CompileError> {
        if node.is("cdecl") {
            if let Some(Child::Node(target)) = node.child(0) {
                if target.is("colon2") {
                    self.compile_child(node, 1)?;
                    self.emit(Op::Dup);
                    self.compile_child(target, 0)?;
                    let name = self.name_child(target, 1)?;
                    self.emit(Op::SetConst { name, scoped: true });
                    return Ok(());
                }
            }
        }
        self.compile_child(node, 1)?;
        self.emit(Op::Dup);
        self.compile_assign_target(node)
    }

    /// Store the value on top of the stack into `target`, consuming it
    pub(super) fn compile_assign_target(&mut self, target: &Node) -> Result<(), CompileError> {
        match target.kind.as_str() {
            "lasgn" => {
                let name = self.name_child(target, 0)?;
                let (slot, depth) = self.declare_local(name.as_str());
                self.emit(Op::SetLocal { slot, depth });
            }
            "iasgn" => {
                let name = self.name_child(target, 0)?;
                self.emit(Op::SetIvar(name));
            }
            "gasgn" => {
                let name = self.name_child(target, 0)?;
                self.emit(Op::SetGlobal(name));
            }
            "cvasgn" => {
                let name = self.name_child(target, 0)?;
                self.emit(Op::SetCvar(name));
            }
            "cdecl" => match target.child(0) {
                Some(Child::Node(scoped)) if scoped.is("colon2") => {
                    self.compile_child(scoped, 0)?;
                    let name = self.name_child(scoped, 1)?;
                    self.emit(Op::SetConst { name, scoped: true });
                }
                _ => {
                    let name = self.name_child(target, 0)?;
                    self.emit(Op::SetConst {
                        name,
                        scoped: false,
                    });
                }
            },
            "attrasgn" => {
                // value recv -> recv value
                self.compile_child(target, 0)?;
                self.emit(Op::Swap);
                let name = self.name_child(target, 1)?;
                self.emit(Op::Send(Rc::new(CallInfo {
                    fcall: is_self(target.node(0)),
                    ..CallInfo::simple(name, 1)
                })));
                self.emit(Op::Pop);
            }
            "splat" => match target.node(0) {
                Some(inner) => self.compile_assign_target(inner)?,
                None => self.emit(Op::Pop),
            },
            "masgn" => {
                let targets = target
                    .node(0)
                    .ok_or_else(|| self.error(target, "malformed masgn: expected targets"))?;
                self.compile_destructure(targets)?;
            }
            _ => {
                return Err(self.error(
                    target,
                    format!("cannot assign to {}", target.kind),
                ))
            }
        }
        Ok(())
    }

    fn compile_masgn(&mut self, node: &Node) -> Result<(), CompileError> {
        let targets = node
            .node(0)
            .filter(|t| t.is("array"))
            .ok_or_else(|| self.error(node, "malformed masgn: expected (array targets...)"))?;
        self.compile_child(node, 1)?;
        self.emit(Op::Dup);
        self.compile_destructure(targets)
    }

    /// Destructure the top value into `(array targets...)`, consuming it
    fn compile_destructure(&mut self, targets: &Node) -> Result<(), CompileError> {
        let all: Vec<&Node> = targets.nodes_from(0).collect();
        let rest_index = all.iter().position(|t| t.is("splat"));
        let (prefix, rest, suffix) = match rest_index {
            Some(i) => (&all[..i], Some(all[i]), &all[i + 1..]),
            None => (&all[..], None, &all[all.len()..]),
        };
        self.emit(Op::ExpandArray {
            count: prefix.len(),
            rest: rest.is_some(),
            post: false,
        });
        for target in prefix {
            self.compile_assign_target(target)?;
        }
        if let Some(rest) = rest {
            if !suffix.is_empty() {
                self.emit(Op::ExpandArray {
                    count: suffix.len(),
                    rest: true,
                    post: true,
                });
            }
            self.compile_assign_target(rest)?;
            for target in suffix {
                self.compile_assign_target(target)?;
            }
        }
        Ok(())
    }

    /// `a ||= v` / `a &&= v`: read, test, assign only when needed
    fn compile_op_asgn(&mut self, node: &Node) -> Result<(), CompileError> {
        let read = node
            .node(0)
            .ok_or_else(|| self.error(node, format!("malformed {}: expected a read", node.kind)))?;
        let assign = node
            .node(1)
            .ok_or_else(|| self.error(node, format!("malformed {}: expected an assignment", node.kind)))?;
        if read.is("lvar") {
            let name = self.name_child(read, 0)?;
            self.declare_local(name.as_str());
        }
        let end = self.emitter.label();
        self.compile_expr(read)?;
        self.emit(Op::Dup);
        if node.is("op_asgn_or") {
            self.emitter.emit_jump(Op::BranchIf, end);
        } else {
            self.emitter.emit_jump(Op::BranchUnless, end);
        }
        self.emit(Op::Pop);
        self.compile_expr(assign)?;
        self.emitter.place(end);
        Ok(())
    }

    /// `recv.name = args`: evaluates to the assigned value, not the call result
    fn compile_attrasgn(&mut self, node: &Node) -> Result<(), CompileError> {
        let name = self.name_child(node, 1)?;
        self.emit(Op::PutNil);
        self.compile_child(node, 0)?;
        let args: Vec<&Node> = node.nodes_from(2).collect();
        let shape = self.compile_arg_list(args)?;
        if shape.splat || shape.block_arg {
            return Err(self.error(node, "attribute assignment cannot splat"));
        }
        self.emit(Op::SetN(shape.argc + 1));
        self.emit(Op::Send(Rc::new(CallInfo {
            fcall: is_self(node.node(0)),
            ..CallInfo::simple(name, shape.argc)
        })));
        self.emit(Op::Pop);
        Ok(())
    }

    // ===== Calls =====

    /// Compile arguments. Splats build one array at runtime; a trailing
    /// `block_pass` sits above the arguments.
    pub(super) fn compile_arg_list(
        &mut self,
        mut args: Vec<&Node>,
    ) -> Result<ArgShape, CompileError> {
        let block_pass = match args.last() {
            Some(last) if last.is("block_pass") => args.pop(),
            _ => None,
        };
        let splat = args.iter().any(|a| a.is("splat"));
        if splat {
            // Runs of plain arguments become literal arrays, splats are
            // converted, and everything is concatenated left to right
            let mut segments = 0;
            let mut run = 0;
            for arg in &args {
                if arg.is("splat") {
                    if run > 0 {
                        self.emit(Op::NewArray(run));
                        segments += 1;
                        if segments > 1 {
                            self.emit(Op::ConcatArray);
                        }
                        run = 0;
                    }
                    let inner = arg
                        .node(0)
                        .ok_or_else(|| self.error(arg, "malformed splat: expected a value"))?;
                    self.compile_expr(inner)?;
                    self.emit(Op::SplatArray);
                    segments += 1;
                    if segments > 1 {
                        self.emit(Op::ConcatArray);
                    }
                } else {
                    self.compile_expr(arg)?;
                    run += 1;
                }
            }
            if run > 0 {
                self.emit(Op::NewArray(run));
                segments += 1;
                if segments > 1 {
                    self.emit(Op::ConcatArray);
                }
            }
        } else {
            for arg in &args {
                self.compile_expr(arg)?;
            }
        }
        if let Some(pass) = block_pass {
            self.compile_child(pass, 0)?;
        }
        Ok(ArgShape {
            argc: if splat { 1 } else { args.len() },
            splat,
            block_arg: block_pass.is_some(),
        })
    }

    /// `(call recv name args...)`; `block` is a literal block compiled by `iter`
    pub(super) fn compile_call(
        &mut self,
        node: &Node,
        block: Option<Rc<CodeObject>>,
    ) -> Result<(), CompileError> {
        let name = self.name_child(node, 1)?;
        let sp = self.emitter.depth();
        let fcall = matches!(node.child(0), None | Some(Child::Nil));
        if fcall {
            self.emit(Op::PutSelf);
        } else {
            self.compile_child(node, 0)?;
        }
        let args: Vec<&Node> = node.nodes_from(2).collect();
        let shape = self.compile_arg_list(args)?;
        if shape.block_arg && block.is_some() {
            return Err(self.error(node, "both block argument and literal block given"));
        }
        let info = CallInfo {
            name,
            argc: shape.argc,
            fcall: fcall || is_self(node.node(0)),
            splat: shape.splat,
            block_arg: shape.block_arg,
            block: block.clone(),
        };
        self.emit_send(Op::Send(Rc::new(info)), block, sp);
        Ok(())
    }

    /// Emit a call; a literal block wraps it in a break entry so `break`
    /// inside the block resumes right after the call
    pub(super) fn emit_send(&mut self, op: Op, block: Option<Rc<CodeObject>>, sp: usize) {
        match block {
            Some(block) => {
                let start = self.emitter.label();
                let after = self.emitter.label();
                self.emitter.place(start);
                self.emit(op);
                self.emitter.place(after);
                self.emitter
                    .add_catch(CatchKind::Break, start, after, after, Some(block), sp);
            }
            None => self.emit(op),
        }
    }

    /// `(iter call (args ...) body)`
    fn compile_iter(&mut self, node: &Node) -> Result<(), CompileError> {
        let call = node
            .node(0)
            .ok_or_else(|| self.error(node, "malformed iter: expected a call"))?;
        let block = self.compile_block_code(node.node(1), node.node(2), node.line)?;
        match call.kind.as_str() {
            "call" => self.compile_call(call, Some(block)),
            "super" | "zsuper" => self.compile_super(call, Some(block)),
            other => Err(self.error(node, format!("malformed iter: cannot attach a block to {}", other))),
        }
    }

    /// `(lambda (args ...) body)` is `lambda { |args| body }`
    fn compile_lambda(&mut self, node: &Node) -> Result<(), CompileError> {
        let block = self.compile_block_code(node.node(0), node.node(1), node.line)?;
        let sp = self.emitter.depth();
        self.emit(Op::PutSelf);
        let info = CallInfo {
            block: Some(Rc::clone(&block)),
            ..CallInfo::fcall("lambda", 0)
        };
        self.emit_send(Op::Send(Rc::new(info)), Some(block), sp);
        Ok(())
    }

    fn compile_yield(&mut self, node: &Node) -> Result<(), CompileError> {
        let args: Vec<&Node> = node.nodes_from(0).collect();
        let shape = self.compile_arg_list(args)?;
        if shape.block_arg {
            return Err(self.error(node, "yield cannot pass a block"));
        }
        self.emit(Op::InvokeBlock {
            argc: shape.argc,
            splat: shape.splat,
        });
        Ok(())
    }

    /// `super(args)` or bare `super`, which re-sends the current method's
    /// parameters as they are now
    pub(super) fn compile_super(
        &mut self,
        node: &Node,
        block: Option<Rc<CodeObject>>,
    ) -> Result<(), CompileError> {
        let sp = self.emitter.depth();
        let zsuper = node.is("zsuper");
        let shape = if zsuper {
            self.compile_zsuper_args()?
        } else {
            let args: Vec<&Node> = node.nodes_from(0).collect();
            self.compile_arg_list(args)?
        };
        if shape.block_arg && block.is_some() {
            return Err(self.error(node, "both block argument and literal block given"));
        }
        let name = self
            .method_compiler()
            .map(|m| m.name.clone())
            .unwrap_or_else(|| Symbol::new("super"));
        let info = CallInfo {
            name,
            argc: shape.argc,
            fcall: true,
            splat: shape.splat,
            block_arg: shape.block_arg,
            block: block.clone(),
        };
        self.emit_send(
            Op::InvokeSuper {
                info: Rc::new(info),
                zsuper,
            },
            block,
            sp,
        );
        Ok(())
    }

    fn compile_zsuper_args(&mut self) -> Result<ArgShape, CompileError> {
        let Some(method) = self.method_compiler() else {
            return Ok(ArgShape {
                argc: 0,
                splat: false,
                block_arg: false,
            });
        };
        let params = method.params.clone();
        let names: Vec<Symbol> = method.locals.borrow().iter().map(|l| l.name.clone()).collect();
        let lead = params.required + params.optional;
        let mut load = |this: &mut Self, slot: usize| {
            let (slot, depth) = this
                .resolve_local(names[slot].as_str())
                .unwrap_or((slot, 0));
            this.emit(Op::GetLocal { slot, depth });
        };
        for slot in 0..lead {
            load(self, slot);
        }
        let keywords = |this: &mut Self, load: &mut dyn FnMut(&mut Self, usize)| {
            for keyword in &params.keywords {
                this.emit(Op::PutObject(Value::Symbol(keyword.name.clone())));
                load(this, keyword.slot);
            }
            this.emit(Op::NewHash(params.keywords.len() * 2));
        };
        match params.rest {
            Some(rest) => {
                self.emit(Op::NewArray(lead));
                load(self, rest);
                self.emit(Op::SplatArray);
                self.emit(Op::ConcatArray);
                if !params.keywords.is_empty() {
                    keywords(self, &mut load);
                    self.emit(Op::NewArray(1));
                    self.emit(Op::ConcatArray);
                }
                Ok(ArgShape {
                    argc: 1,
                    splat: true,
                    block_arg: false,
                })
            }
            None => {
                let mut argc = lead;
                if !params.keywords.is_empty() {
                    keywords(self, &mut load);
                    argc += 1;
                }
                Ok(ArgShape {
                    argc,
                    splat: false,
                    block_arg: false,
                })
            }
        }
    }
}

fn is_self(node: Option<&Node>) -> bool {
    node.map_or(false, |n| n.is("self"))
}

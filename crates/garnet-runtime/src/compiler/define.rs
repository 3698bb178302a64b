//! Definitions: methods, blocks, classes, modules and parameter prologues

use super::Compiler;
use crate::ast::{Child, Node};
use crate::bytecode::{CodeKind, CodeObject, ConstScope, DefineKind, KeywordParam, LocalKind, Op};
use crate::error::CompileError;
use crate::symbol::Symbol;
use std::rc::Rc;

/// Parameters grouped by kind, in declaration order within each kind
#[derive(Default)]
struct ParamList<'n> {
    required: Vec<&'n str>,
    optional: Vec<(&'n str, &'n Node)>,
    rest: Option<&'n str>,
    keywords: Vec<(&'n str, Option<&'n Node>)>,
    block: Option<&'n str>,
}

impl Compiler<'_> {
    /// `(defn name (args ...) body)` / `(defs recv name (args ...) body)`
    pub(super) fn compile_def(&mut self, node: &Node) -> Result<(), CompileError> {
        let singleton = node.is("defs");
        let offset = usize::from(singleton);
        let name = self.name_child(node, offset)?;
        let code = {
            let mut method = self.child(CodeKind::Method, name.clone(), node.line);
            method.compile_params(node.node(offset + 1))?;
            method.compile_child(node, offset + 2)?;
            method.emit(Op::Leave);
            method.finish()?
        };
        if singleton {
            self.compile_child(node, 0)?;
        }
        self.emit(Op::DefineMethod {
            name,
            code,
            singleton,
        });
        Ok(())
    }

    /// `class`, `module` and `class << obj`
    pub(super) fn compile_class(&mut self, node: &Node) -> Result<(), CompileError> {
        let (kind, body_index) = match node.kind.as_str() {
            "class" => (
                DefineKind::Class {
                    has_super: !matches!(node.child(1), None | Some(Child::Nil)),
                },
                2,
            ),
            "module" => (DefineKind::Module, 1),
            _ => (DefineKind::Singleton, 1),
        };

        let (name, scope) = if kind == DefineKind::Singleton {
            self.compile_child(node, 0)?;
            (Symbol::new("singleton class"), ConstScope::Lexical)
        } else {
            self.compile_class_path(node)?
        };
        if let DefineKind::Class { has_super: true } = kind {
            self.compile_child(node, 1)?;
        }

        let code = {
            let mut body = self.child(CodeKind::Class, name.clone(), node.line);
            body.compile_child(node, body_index)?;
            body.emit(Op::Leave);
            body.finish()?
        };
        self.emit(Op::DefineClass {
            name,
            code,
            kind,
            scope,
        });
        Ok(())
    }

    /// Class name: `Foo`, `(const Foo)`, `(colon2 scope Foo)` (scope is pushed) or `(colon3 Foo)`
    fn compile_class_path(&mut self, node: &Node) -> Result<(Symbol, ConstScope), CompileError> {
        match node.child(0) {
            Some(Child::Node(path)) if path.is("colon2") => {
                self.compile_child(path, 0)?;
                Ok((self.name_child(path, 1)?, ConstScope::Scoped))
            }
            Some(Child::Node(path)) if path.is("colon3") => {
                Ok((self.name_child(path, 0)?, ConstScope::Top))
            }
            Some(Child::Node(path)) if path.is("const") => {
                Ok((self.name_child(path, 0)?, ConstScope::Lexical))
            }
            _ => Ok((self.name_child(node, 0)?, ConstScope::Lexical)),
        }
    }

    /// Block body as a child code object. `redo` at block level jumps back
    /// to the first instruction after the parameter prologue.
    pub(super) fn compile_block_code(
        &self,
        args: Option<&Node>,
        body: Option<&Node>,
        line: u32,
    ) -> Result<Rc<CodeObject>, CompileError> {
        let mut block = self.child(CodeKind::Block, self.name.clone(), line);
        block.compile_params(args)?;
        let body_label = block.emitter.label();
        block.emitter.place(body_label);
        block.body_label = Some(body_label);
        match body {
            Some(body) => block.compile_expr(body)?,
            None => block.emit(Op::PutNil),
        }
        block.emit(Op::Leave);
        block.finish()
    }

    // ===== Parameters =====

    fn collect_params<'n>(&self, args: &'n Node) -> Result<ParamList<'n>, CompileError> {
        let mut list = ParamList::default();
        for child in &args.children {
            match child {
                Child::Text(name) => list.required.push(name),
                Child::Node(param) => {
                    let name = param.text(0);
                    match (param.kind.as_str(), name) {
                        ("optarg", Some(name)) => {
                            let default = param.node(1).ok_or_else(|| {
                                self.error(param, "malformed optarg: expected a default")
                            })?;
                            list.optional.push((name, default));
                        }
                        ("restarg", name) => list.rest = Some(name.unwrap_or("*")),
                        ("kwarg", Some(name)) => list.keywords.push((name, param.node(1))),
                        ("blockarg", Some(name)) => list.block = Some(name),
                        (kind, _) => {
                            return Err(self.error(param, format!("malformed parameter: {}", kind)))
                        }
                    }
                }
                Child::Nil => {}
                _ => return Err(self.error(args, "malformed args: unexpected child")),
            }
        }
        Ok(list)
    }

    /// Declare parameters in canonical slot order and emit the prologue that
    /// fills in defaults for optionals and keywords the caller left out
    pub(super) fn compile_params(&mut self, args: Option<&Node>) -> Result<(), CompileError> {
        let Some(args) = args else {
            return Ok(());
        };
        if !args.is("args") {
            return Err(self.error(
                args,
                format!("malformed parameters: expected (args ...), found {}", args.kind),
            ));
        }
        let list = self.collect_params(args)?;

        for name in &list.required {
            self.add_local(name, LocalKind::Arg);
        }
        let optional_slots: Vec<usize> = list
            .optional
            .iter()
            .map(|(name, _)| self.add_local(name, LocalKind::Optional))
            .collect();
        self.params.required = list.required.len();
        self.params.optional = list.optional.len();
        self.params.rest = list.rest.map(|name| self.add_local(name, LocalKind::Rest));
        self.params.keywords = list
            .keywords
            .iter()
            .map(|(name, default)| KeywordParam {
                name: Symbol::new(name),
                slot: self.add_local(name, LocalKind::Keyword),
                required: default.is_none(),
            })
            .collect();
        self.params.block = list.block.map(|name| self.add_local(name, LocalKind::Block));

        if !list.optional.is_empty() {
            for ((_, default), slot) in list.optional.iter().zip(optional_slots) {
                self.params.opt_entries.push(self.emitter.pc());
                self.compile_expr(default)?;
                self.emit(Op::SetLocal { slot, depth: 0 });
            }
            self.params.opt_entries.push(self.emitter.pc());
        }
        for (index, (_, default)) in list.keywords.iter().enumerate() {
            let Some(default) = default else { continue };
            let supplied = self.emitter.label();
            self.emit(Op::CheckKeyword(index));
            self.emitter.emit_jump(Op::BranchIf, supplied);
            self.compile_expr(default)?;
            let slot = self.params.keywords[index].slot;
            self.emit(Op::SetLocal { slot, depth: 0 });
            self.emitter.place(supplied);
        }
        self.params.body_start = self.emitter.pc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::sexp;
    use crate::bytecode::{validator, CodeObject, DefineKind, LocalKind, Op};
    use crate::compiler::compile;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    fn first_child(source: &str) -> Rc<CodeObject> {
        let node = sexp::parse(source, "test.rb").unwrap();
        let code = compile(&node, "test.rb").unwrap();
        validator::validate(&code).unwrap();
        code.children().remove(0)
    }

    #[test]
    fn test_params_take_canonical_slots() {
        let method = first_child(
            "(defn f (args (blockarg blk) (kwarg k) (restarg r) (optarg o (lit 1)) a) (nil))",
        );
        let kinds: Vec<LocalKind> = method.locals.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LocalKind::Arg,
                LocalKind::Optional,
                LocalKind::Rest,
                LocalKind::Keyword,
                LocalKind::Block
            ]
        );
        assert_eq!(method.params.rest, Some(2));
        assert!(method.params.keywords[0].required);
    }

    #[test]
    fn test_optional_prologue_has_one_entry_per_supplied_count() {
        let method = first_child("(defn f (args (optarg a (lit 1)) (optarg b (lit 2))) (lvar b))");
        assert_eq!(method.params.opt_entries, vec![0, 2, 4]);
        assert_eq!(method.params.body_start, 4);
    }

    #[test]
    fn test_keyword_default_checks_presence() {
        let method = first_child("(defn f (args (kwarg k (lit 5))) (lvar k))");
        assert!(matches!(method.instructions[0].op, Op::CheckKeyword(0)));
        assert!(!method.params.keywords[0].required);
    }

    #[test]
    fn test_scoped_class_pushes_scope_then_superclass() {
        let node = sexp::parse("(class (colon2 (const A) B) (const C) (nil))", "test.rb").unwrap();
        let code = compile(&node, "test.rb").unwrap();
        let ops: Vec<&str> = code.instructions.iter().map(|i| i.op.mnemonic()).collect();
        assert_eq!(ops, vec!["getconst", "getconst", "defineclass", "leave"]);
        assert!(matches!(
            code.instructions[2].op,
            Op::DefineClass {
                kind: DefineKind::Class { has_super: true },
                ..
            }
        ));
    }

    #[test]
    fn test_singleton_def_pushes_receiver() {
        let node = sexp::parse("(defs (self) foo (args) (lit 1))", "test.rb").unwrap();
        let code = compile(&node, "test.rb").unwrap();
        assert!(matches!(code.instructions[0].op, Op::PutSelf));
        assert!(matches!(
            code.instructions[1].op,
            Op::DefineMethod {
                singleton: true,
                ..
            }
        ));
    }
}

//! Compiler output: catch tables, validation and compile errors

mod common;

use common::*;
#[allow(unused_imports)]
use common::assert_eq;
use garnet_runtime::ast::sexp;
use garnet_runtime::bytecode::{disasm, validator, CatchKind, CodeObject};
use garnet_runtime::{compiler, RuntimeError};
use proptest::prelude::*;
use rstest::rstest;
use std::rc::Rc;

fn compile(source: &str) -> Rc<CodeObject> {
    let node = sexp::parse(source, "test.rb").unwrap();
    compiler::compile(&node, "test.rb").unwrap()
}

/// Every code object reachable from `root`, root first
fn all_code(root: &Rc<CodeObject>) -> Vec<Rc<CodeObject>> {
    let mut out: Vec<Rc<CodeObject>> = Vec::new();
    let mut pending = vec![Rc::clone(root)];
    while let Some(code) = pending.pop() {
        if out.iter().any(|seen| Rc::ptr_eq(seen, &code)) {
            continue;
        }
        pending.extend(code.children());
        out.push(code);
    }
    out
}

fn assert_catch_tables_in_range(root: &Rc<CodeObject>) {
    for code in all_code(root) {
        let len = code.instructions.len();
        for entry in &code.catch_table {
            assert!(
                entry.start <= entry.end && entry.end <= len && entry.cont < len,
                "{:?} entry {}..{} -> {} outside {} instructions of {}",
                entry.kind,
                entry.start,
                entry.end,
                entry.cont,
                len,
                code.label()
            );
        }
    }
}

#[test]
fn test_rescue_and_ensure_register_handlers() {
    let code = compile(
        r#"(ensure (rescue (call _ work) (resbody (array) _ (retry))) (call _ cleanup))"#,
    );
    let kinds: Vec<CatchKind> = code.catch_table.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&CatchKind::Rescue));
    assert!(kinds.contains(&CatchKind::Retry));
    assert!(kinds.contains(&CatchKind::Ensure));
    for entry in &code.catch_table {
        assert!(entry.handler.is_some(), "{:?} entry has no handler", entry.kind);
    }
    assert_catch_tables_in_range(&code);
    assert!(validator::validate(&code).is_ok());
}

#[test]
fn test_block_call_gets_break_entry_tagged_with_block() {
    let code = compile("(iter (call (lit 3) times) (args i) (break (lvar i)))");
    let entry = code
        .catch_table
        .iter()
        .find(|e| e.kind == CatchKind::Break)
        .expect("break entry");
    let block = entry.handler.as_ref().expect("block tag");
    assert!(code.children().iter().any(|child| Rc::ptr_eq(child, block)));
}

#[test]
fn test_disassembly_lists_code_objects() {
    let code = compile("(defn twice (args x) (call (lvar x) * (lit 2))) (call _ twice (lit 4))");
    let text = disasm::disassemble(&code);
    assert!(text.contains("twice"), "{}", text);
    assert!(text.contains("locals: x<arg>"), "{}", text);
    assert!(text.contains("leave"), "{}", text);
}

#[test]
fn test_compile_errors_carry_position() {
    let (mut runtime, _) = capturing_runtime();
    let err = runtime.eval_sexp("(block\n  (lit 1)\n  (break))").unwrap_err();
    match err {
        RuntimeError::Compile(err) => {
            assert_eq!(err.span.line, 3);
            assert!(err.message.contains("break"), "{}", err.message);
        }
        other => panic!("expected compile error, got {:?}", other),
    }
}

#[test]
fn test_unknown_node_kind_is_rejected() {
    let err = eval_error("(frobnicate (lit 1))");
    assert!(matches!(err, RuntimeError::Compile(_)), "{:?}", err);
}

#[test]
fn test_return_in_class_body_is_rejected() {
    let err = eval_error("(class Foo _ (return (lit 1)))");
    assert!(matches!(err, RuntimeError::Compile(_)), "{:?}", err);
}

#[rstest]
#[case("(defn f (args) (gasgn $x (lit 1)) (lit 2))", "malformed defn")]
#[case("(defs (self) f (args) (lit 1) (lit 2))", "malformed defs")]
#[case("(class A _ (defn m (args) (lit 1)) (defn n (args) (lit 2)))", "malformed class")]
#[case("(module M (lit 1) (lit 2))", "malformed module")]
#[case("(sclass (self) (lit 1) (lit 2))", "malformed sclass")]
#[case("(if (true) (lit 1) (lit 2) (lit 3))", "malformed if")]
#[case("(while (false) (lit 1) (gasgn $w (lit 9)))", "malformed while")]
#[case("(until (true) (lit 1) post (lit 2))", "malformed until")]
#[case("(iter (call (lit 1) times) (args i) (lit 1) (lit 2))", "malformed iter")]
#[case("(iter (call (lit 1) times) (gasgn $x (lit 1)) (lit 2))", "malformed parameters")]
#[case("(lambda (args) (lit 1) (lit 2))", "malformed lambda")]
#[case("(ensure (lit 1) (lit 2) (lit 3))", "malformed ensure")]
#[case("(lasgn a (lit 1) (lit 2))", "malformed lasgn")]
#[case("(return (lit 1) (lit 2))", "malformed return")]
fn test_extra_children_are_rejected(#[case] source: &str, #[case] expected: &str) {
    match eval_error(source) {
        RuntimeError::Compile(err) => {
            assert!(err.message.contains(expected), "{}", err.message);
        }
        other => panic!("expected compile error, got {:?}", other),
    }
}

#[test]
fn test_json_tree_line_numbers_reach_backtrace() {
    let json = r#"{
        "kind": "block",
        "file": "app.rb",
        "line": 1,
        "children": [
            {"kind": "lasgn", "line": 1, "children": ["a", {"kind": "lit", "children": [1]}]},
            {"kind": "call", "line": 7, "children": [null, "raise", {"kind": "str", "children": ["late"]}]}
        ]
    }"#;
    let (mut runtime, _) = capturing_runtime();
    match runtime.eval_json(json).unwrap_err() {
        RuntimeError::Uncaught { message, backtrace, .. } => {
            assert_eq!(message, "late");
            assert!(backtrace[0].ends_with(":7:in '<main>'"), "{:?}", backtrace);
        }
        other => panic!("expected uncaught exception, got {:?}", other),
    }
}

// ===== Generated programs =====

/// Builds nested programs from a list of choices. Loops always terminate:
/// each `while` counts to two before its body runs, and there is no
/// `redo` or `retry`.
struct ProgramGen<'a> {
    choices: std::slice::Iter<'a, u8>,
    fresh: usize,
}

impl ProgramGen<'_> {
    fn pick(&mut self) -> u8 {
        self.choices.next().copied().unwrap_or(0)
    }

    fn fresh(&mut self) -> usize {
        self.fresh += 1;
        self.fresh
    }

    fn stmt(&mut self, depth: usize, in_loop: bool) -> String {
        if depth == 0 {
            return self.leaf(in_loop);
        }
        match self.pick() % 8 {
            0 => {
                let k = format!("k{}", self.fresh());
                let body = self.stmt(depth - 1, true);
                format!(
                    "(block (lasgn {k} (lit 0)) (while (call (lvar {k}) < (lit 2)) \
                     (block (lasgn {k} (call (lvar {k}) + (lit 1))) {body})))"
                )
            }
            1 => format!("(iter (call (lit 2) times) (args i) {})", self.stmt(depth - 1, true)),
            2 => format!(
                "(rescue {} (resbody (array) e {}))",
                self.stmt(depth - 1, in_loop),
                self.stmt(depth - 1, in_loop)
            ),
            3 => format!(
                "(ensure {} {})",
                self.stmt(depth - 1, in_loop),
                self.stmt(depth - 1, in_loop)
            ),
            4 => format!(
                "(if (gvar $flag) {} {})",
                self.stmt(depth - 1, in_loop),
                self.stmt(depth - 1, in_loop)
            ),
            5 => format!(
                "(block {} {})",
                self.stmt(depth - 1, in_loop),
                self.stmt(depth - 1, in_loop)
            ),
            6 => {
                let n = self.fresh();
                format!(
                    "(block (defn m{n} (args) {}) (call _ m{n}))",
                    self.stmt(depth - 1, false)
                )
            }
            _ => self.leaf(in_loop),
        }
    }

    fn leaf(&mut self, in_loop: bool) -> String {
        match self.pick() % 6 {
            0 => "(lit 1)".to_string(),
            1 => r#"(call _ raise (str "e"))"#.to_string(),
            2 if in_loop => "(break (lit 2))".to_string(),
            3 if in_loop => "(next (lit 3))".to_string(),
            4 => "(return (lit 4))".to_string(),
            _ => "(gasgn $flag (call (gvar $flag) !))".to_string(),
        }
    }
}

fn generate(choices: &[u8]) -> String {
    let mut gen = ProgramGen {
        choices: choices.iter(),
        fresh: 0,
    };
    let body = gen.stmt(4, false);
    format!("(gasgn $flag (true)) {}", body)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_generated_programs_compile_to_valid_bytecode(choices in prop::collection::vec(any::<u8>(), 1..48)) {
        let source = generate(&choices);
        let code = compile(&source);
        assert_catch_tables_in_range(&code);
        let verdict = validator::validate(&code);
        prop_assert!(verdict.is_ok(), "{:?}\n{}", verdict, source);
    }

    #[test]
    fn prop_generated_programs_never_corrupt_the_vm(choices in prop::collection::vec(any::<u8>(), 1..48)) {
        let source = generate(&choices);
        let (mut runtime, _) = capturing_runtime();
        match runtime.eval_sexp(&source) {
            Ok(_) => {}
            Err(RuntimeError::Uncaught { class, .. }) => prop_assert_eq!(class, "RuntimeError", "{}", source),
            Err(other) => prop_assert!(false, "{}\n{}", other, source),
        }
    }
}

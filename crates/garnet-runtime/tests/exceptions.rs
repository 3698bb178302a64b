//! raise, rescue, ensure and retry

mod common;

use common::*;
#[allow(unused_imports)]
use common::assert_eq;
use garnet_runtime::{RuntimeError, Value};
use rstest::rstest;

#[test]
fn test_rescue_gives_the_handler_value() {
    let source = r#"(rescue (call _ raise (str "x")) (resbody (array) _ (lit 1)))"#;
    assert_eq!(eval(source), Value::Integer(1));
}

#[test]
fn test_rescue_binds_the_exception() {
    let source = r#"
        (rescue
          (call _ raise (const ArgumentError) (str "bad input"))
          (resbody (array (const ArgumentError)) e (call (lvar e) message)))
    "#;
    assert_eq!(eval(source), Value::string("bad input"));
}

#[test]
fn test_else_runs_only_without_exception() {
    let quiet = "(rescue (lit 1) (resbody (array) _ (lit 2)) (lit 3))";
    assert_eq!(eval(quiet), Value::Integer(3));
    let loud = r#"(rescue (call _ raise (str "no")) (resbody (array) _ (lit 2)) (lit 3))"#;
    assert_eq!(eval(loud), Value::Integer(2));
}

#[test]
fn test_first_matching_clause_wins() {
    let source = r#"
        (rescue
          (call (hash) fetch (sym missing))
          (resbody (array (const TypeError)) _ (sym type))
          (resbody (array (const IndexError)) e (call (call (lvar e) class) name))
          (resbody (array) _ (sym standard)))
    "#;
    assert_eq!(eval(source), Value::string("KeyError"));
}

#[test]
fn test_unmatched_exception_propagates() {
    let source = r#"
        (rescue
          (call _ raise (const ArgumentError) (str "wrong"))
          (resbody (array (const TypeError)) _ (lit 1)))
    "#;
    assert_uncaught(source, "ArgumentError", "wrong");
}

#[test]
fn test_bare_rescue_does_not_catch_non_standard_errors() {
    let source = r#"
        (rescue
          (call _ raise (const Exception) (str "fatal"))
          (resbody (array) _ (lit 1)))
    "#;
    assert_uncaught(source, "Exception", "fatal");
}

#[test]
fn test_reraise_from_handler() {
    let source = r#"
        (rescue
          (rescue (call _ raise (str "inner")) (resbody (array) _ (call _ raise)))
          (resbody (array) outer (call (lvar outer) message)))
    "#;
    assert_eq!(eval(source), Value::string("inner"));
}

#[test]
fn test_custom_exception_class() {
    let source = r#"
        (class AppError (const StandardError)
          (defn to_s (args) (str "app failed")))
        (rescue
          (call _ raise (const AppError))
          (resbody (array (const AppError)) e (array (call (lvar e) message) (call (lvar e) inspect))))
    "#;
    assert_eq!(eval_inspect(source), r##"["app failed", "#<AppError: app failed>"]"##);
}

// ===== ensure =====

#[test]
fn test_ensure_keeps_body_value_and_runs_once() {
    let source = r#"
        (lasgn log (array))
        (lasgn result (ensure (lit 1) (block (call (lvar log) << (sym ensured)) (lit 2))))
        (array (lvar result) (lvar log))
    "#;
    assert_eq!(eval_inspect(source), "[1, [:ensured]]");
}

#[test]
fn test_ensure_runs_once_when_body_raises() {
    let source = r#"
        (lasgn log (array))
        (lasgn result
          (rescue
            (ensure (call _ raise (str "x")) (call (lvar log) << (sym ensured)))
            (resbody (array) _ (lit 2))))
        (array (lvar result) (lvar log))
    "#;
    assert_eq!(eval_inspect(source), "[2, [:ensured]]");
}

#[test]
fn test_ensure_runs_on_return() {
    let source = r#"
        (defn early (args)
          (block
            (ensure (return (lit 1)) (gasgn $ran (true)))
            (lit 2)))
        (array (call _ early) (gvar $ran))
    "#;
    assert_eq!(eval_inspect(source), "[1, true]");
}

#[test]
fn test_ensure_runs_on_break_out_of_loop() {
    let source = r#"
        (lasgn count (lit 0))
        (lasgn value
          (while (true)
            (ensure (break (sym out)) (lasgn count (call (lvar count) + (lit 1))))))
        (array (lvar value) (lvar count))
    "#;
    assert_eq!(eval_inspect(source), "[:out, 1]");
}

#[test]
fn test_ensure_runs_when_exception_is_uncaught() {
    let source = r#"
        (ensure (call _ raise (str "boom")) (call _ puts (str "cleanup")))
    "#;
    assert_eq!(eval_output(source), "cleanup\n");
    assert_uncaught(source, "RuntimeError", "boom");
}

// ===== retry =====

#[test]
fn test_retry_reruns_protected_body() {
    let source = r#"
        (lasgn attempts (lit 0))
        (rescue
          (block
            (lasgn attempts (call (lvar attempts) + (lit 1)))
            (if (call (lvar attempts) < (lit 3))
              (call _ raise (str "again"))
              (lvar attempts)))
          (resbody (array) _ (retry)))
    "#;
    assert_eq!(eval(source), Value::Integer(3));
}

#[test]
fn test_retry_inside_method() {
    let source = r#"
        (defn flaky (args)
          (block
            (lasgn tries (lit 0))
            (rescue
              (block
                (lasgn tries (call (lvar tries) + (lit 1)))
                (if (call (lvar tries) == (lit 1)) (call (lit 1) / (lit 0)) _)
                (lvar tries))
              (resbody (array (const ZeroDivisionError)) _ (retry)))))
        (call _ flaky)
    "#;
    assert_eq!(eval(source), Value::Integer(2));
}

#[test]
fn test_retry_from_ensure_clause_inside_rescue() {
    let source = r#"
        (lasgn attempts (lit 0))
        (lasgn cleanups (lit 0))
        (lasgn result
          (rescue
            (block
              (lasgn attempts (call (lvar attempts) + (lit 1)))
              (if (call (lvar attempts) < (lit 3)) (call _ raise (str "again")) _)
              (lvar attempts))
            (resbody (array) _
              (ensure
                (call _ raise (str "cleanup failed"))
                (block (lasgn cleanups (call (lvar cleanups) + (lit 1))) (retry))))))
        (array (lvar result) (lvar cleanups))
    "#;
    assert_eq!(eval_inspect(source), "[3, 2]");
}

// ===== Builtin errors =====

#[rstest]
#[case("(call (lit 1) / (lit 0))", "ZeroDivisionError", "divided by 0")]
#[case(
    "(call (lit 1) frobnicate)",
    "NoMethodError",
    "undefined method 'frobnicate' for an instance of Integer"
)]
#[case("(call (nil) upcase)", "NoMethodError", "undefined method 'upcase' for nil")]
#[case("(const Missing)", "NameError", "uninitialized constant Missing")]
#[case(r#"(call (lit 1) + (str "a"))"#, "TypeError", "String can't be coerced into Integer")]
#[case("(call (hash) fetch (sym k))", "KeyError", "key not found: :k")]
#[case("(call _ raise (lit 1))", "TypeError", "exception class/object expected")]
fn test_builtin_errors(#[case] source: &str, #[case] class: &str, #[case] message: &str) {
    assert_uncaught(source, class, message);
}

#[test]
fn test_deep_recursion_is_a_rescuable_system_stack_error() {
    let source = r#"
        (defn down (args n) (call _ down (call (lvar n) + (lit 1))))
        (rescue
          (call _ down (lit 0))
          (resbody (array (const SystemStackError)) e (call (lvar e) message)))
    "#;
    assert_eq!(eval(source), Value::string("stack level too deep"));
}

#[test]
fn test_uncaught_exception_carries_backtrace() {
    let source = r#"
        (defn fail (args) (call _ raise (str "deep")))
        (call _ fail)
    "#;
    match eval_error(source) {
        RuntimeError::Uncaught { backtrace, .. } => {
            assert!(backtrace.len() >= 2, "backtrace: {:?}", backtrace);
            assert!(backtrace[0].contains("fail"), "backtrace: {:?}", backtrace);
            assert!(backtrace.iter().all(|line| line.starts_with("<input>:")));
        }
        other => panic!("expected uncaught exception, got {:?}", other),
    }
}

#[test]
fn test_exception_objects() {
    let source = r#"
        (lasgn e (call (const RuntimeError) new (str "boom")))
        (array
          (call (lvar e) message)
          (call (lvar e) inspect)
          (call (call (const RuntimeError) new) message)
          (call (call (lvar e) exception (str "other")) message)
          (call (lvar e) backtrace))
    "#;
    assert_eq!(
        eval_inspect(source),
        r##"["boom", "#<RuntimeError: boom>", "RuntimeError", "other", nil]"##
    );
}

// ===== Orphaned jumps =====

#[test]
fn test_break_from_orphaned_proc_is_local_jump_error() {
    let source = r#"
        (defn make (args) (iter (call _ proc) _ (break (lit 1))))
        (call (call _ make) call)
    "#;
    assert_uncaught(source, "LocalJumpError", "break from proc-closure");
}

#[test]
fn test_return_from_orphaned_proc_is_local_jump_error() {
    let source = r#"
        (defn make (args) (iter (call _ proc) _ (return (lit 1))))
        (call (call _ make) call)
    "#;
    assert_uncaught(source, "LocalJumpError", "unexpected return");
}

#[test]
fn test_return_from_block_in_class_body() {
    let source = r#"
        (class Early _ (iter (call (array (lit 1)) each) (args x) (return (lit 1))))
    "#;
    assert_uncaught(source, "LocalJumpError", "unexpected return");

    let method_body = r#"
        (class Early _ (iter (call _ define_method (sym five)) _ (return (lit 5))))
        (call (call (const Early) new) five)
    "#;
    assert_eq!(eval(method_body), Value::Integer(5));
}

#[test]
fn test_deep_builtin_reentry_is_rescued_on_small_thread_stack() {
    let source = r#"
        (defn dive (args n)
          (if (call (lvar n) > (lit 0))
            (iter (call (array (lit 1)) each) (args x) (call _ dive (call (lvar n) - (lit 1))))
            (sym bottom)))
        (array
          (call _ dive (lit 10))
          (rescue (call _ dive (lit 150)) (resbody (array (const SystemStackError)) _ (sym too_deep))))
    "#;
    let handle = std::thread::Builder::new()
        .stack_size(2 << 20)
        .spawn(move || eval_inspect(source))
        .unwrap();
    assert_eq!(handle.join().unwrap(), "[[1], :too_deep]");
}

//! Blocks, procs and lambdas

mod common;

use common::*;
#[allow(unused_imports)]
use common::assert_eq;
use garnet_runtime::Value;

#[test]
fn test_closure_outlives_its_method() {
    let source = r#"
        (defn make_counter (args)
          (block
            (lasgn count (lit 0))
            (lambda (args) (lasgn count (call (lvar count) + (lit 1))))))
        (lasgn counter (call _ make_counter))
        (call (lvar counter) call)
        (call (lvar counter) call)
        (call (lvar counter) call)
    "#;
    assert_eq!(eval(source), Value::Integer(3));
}

#[test]
fn test_closures_share_one_environment() {
    let source = r#"
        (defn make_pair (args)
          (block
            (lasgn n (lit 0))
            (array
              (lambda (args) (lasgn n (call (lvar n) + (lit 10))))
              (lambda (args) (lvar n)))))
        (lasgn pair (call _ make_pair))
        (call (call (lvar pair) [] (lit 0)) call)
        (call (call (lvar pair) [] (lit 0)) call)
        (call (call (lvar pair) [] (lit 1)) call)
    "#;
    assert_eq!(eval(source), Value::Integer(20));
}

#[test]
fn test_separate_calls_get_separate_environments() {
    let source = r#"
        (defn make_counter (args)
          (block
            (lasgn count (lit 0))
            (lambda (args) (lasgn count (call (lvar count) + (lit 1))))))
        (lasgn a (call _ make_counter))
        (lasgn b (call _ make_counter))
        (call (lvar a) call)
        (call (lvar a) call)
        (array (call (lvar a) call) (call (lvar b) call))
    "#;
    assert_eq!(eval_inspect(source), "[3, 1]");
}

#[test]
fn test_block_writes_reach_enclosing_locals() {
    let source = r#"
        (lasgn total (lit 0))
        (iter (call (array (lit 1) (lit 2) (lit 3)) each) (args x)
          (lasgn total (call (lvar total) + (lvar x))))
        (lvar total)
    "#;
    assert_eq!(eval(source), Value::Integer(6));
}

// ===== Arity =====

#[test]
fn test_proc_spreads_single_array_argument() {
    let source = r#"
        (lasgn pr (iter (call _ proc) (args a b) (array (lvar b) (lvar a))))
        (call (lvar pr) call (array (lit 1) (lit 2)))
    "#;
    assert_eq!(eval_inspect(source), "[2, 1]");
}

#[test]
fn test_lambda_checks_arity_strictly() {
    let source = r#"
        (lasgn l (lambda (args a b) (array (lvar b) (lvar a))))
        (call (lvar l) call (array (lit 1) (lit 2)))
    "#;
    assert_uncaught(source, "ArgumentError", "wrong number of arguments (given 1, expected 2)");
}

#[test]
fn test_proc_pads_and_drops_arguments() {
    let source = r#"
        (lasgn pr (iter (call _ proc) (args a b) (array (lvar a) (lvar b))))
        (array (call (lvar pr) call (lit 1)) (call (lvar pr) call (lit 1) (lit 2) (lit 3)))
    "#;
    assert_eq!(eval_inspect(source), "[[1, nil], [1, 2]]");
}

#[test]
fn test_hash_each_spreads_pairs() {
    let source = r#"
        (lasgn out (array))
        (iter (call (hash (sym a) (lit 1) (sym b) (lit 2)) each) (args k v)
          (call (lvar out) push (call (lvar k) to_s) (lvar v)))
        (lvar out)
    "#;
    assert_eq!(eval_inspect(source), r#"["a", 1, "b", 2]"#);
}

#[test]
fn test_arity_and_lambda_predicates() {
    let source = r#"
        (lasgn l (lambda (args a (optarg b (lit 1))) (nil)))
        (lasgn pr (iter (call _ proc) (args a b) (nil)))
        (array (call (lvar l) arity) (call (lvar l) lambda?) (call (lvar pr) arity) (call (lvar pr) lambda?))
    "#;
    assert_eq!(eval_inspect(source), "[-2, true, 2, false]");
}

// ===== return, break and next in closures =====

#[test]
fn test_return_in_lambda_leaves_only_the_lambda() {
    let source = r#"
        (defn run (args)
          (block
            (lasgn l (lambda (args) (block (return (lit 1)) (lit 2))))
            (call (call (lvar l) call) + (lit 10))))
        (call _ run)
    "#;
    assert_eq!(eval(source), Value::Integer(11));
}

#[test]
fn test_next_in_lambda_returns_its_value() {
    let source = "(call (lambda (args x) (block (next (call (lvar x) * (lit 2))) (lit 0))) call (lit 4))";
    assert_eq!(eval(source), Value::Integer(8));
}

#[test]
fn test_yield_and_block_given() {
    let source = r#"
        (defn maybe (args)
          (if (call _ block_given?) (yield (lit 5)) (sym none)))
        (array (call _ maybe) (iter (call _ maybe) (args x) (call (lvar x) + (lit 1))))
    "#;
    assert_eq!(eval_inspect(source), "[:none, 6]");
}

#[test]
fn test_block_argument_captures_and_forwards() {
    let source = r#"
        (defn capture (args (blockarg blk)) (lvar blk))
        (defn forward (args items (blockarg blk)) (call (lvar items) map (block_pass (lvar blk))))
        (lasgn doubler (iter (call _ capture) (args x) (call (lvar x) * (lit 2))))
        (array
          (call (lvar doubler) call (lit 21))
          (call _ forward (array (lit 1) (lit 2)) (block_pass (lvar doubler))))
    "#;
    assert_eq!(eval_inspect(source), "[42, [2, 4]]");
}

#[test]
fn test_symbol_to_proc() {
    let source = r#"(call (array (str "a") (str "b")) map (block_pass (sym upcase)))"#;
    assert_eq!(eval_inspect(source), r#"["A", "B"]"#);
}

#[test]
fn test_define_method_closure_sees_definition_scope() {
    let source = r#"
        (class Greeter _
          (block
            (lasgn suffix (str "!"))
            (iter (call _ define_method (sym greet)) (args name)
              (call (lvar name) + (lvar suffix)))))
        (call (call (const Greeter) new) greet (str "bob"))
    "#;
    assert_eq!(eval(source), Value::string("bob!"));
}

#[test]
fn test_yield_to_block_with_many_params_spreads_array() {
    let source = r#"
        (defn pairs (args) (yield (array (lit 1) (lit 2))))
        (iter (call _ pairs) (args a b) (call (lvar a) + (lvar b)))
    "#;
    assert_eq!(eval(source), Value::Integer(3));
}

//! Loops, conditionals, case and jumps out of loops and blocks

mod common;

use common::*;
#[allow(unused_imports)]
use common::assert_eq;
use garnet_runtime::Value;
use rstest::rstest;

#[test]
fn test_locals_in_array_literal() {
    let result = eval_inspect("(lasgn a (lit 1)) (lasgn b (lit 2)) (array (lvar a) (lvar b))");
    assert_eq!(result, "[1, 2]");
}

#[test]
fn test_while_runs_until_condition_fails() {
    let source = r#"
        (lasgn i (lit 0))
        (while (call (lvar i) < (lit 5))
          (lasgn i (call (lvar i) + (lit 1))))
        (lvar i)
    "#;
    assert_eq!(eval(source), Value::Integer(5));
}

#[test]
fn test_while_value_is_nil_without_break() {
    let source = r#"
        (lasgn i (lit 0))
        (while (call (lvar i) < (lit 2)) (lasgn i (call (lvar i) + (lit 1))))
    "#;
    assert_eq!(eval(source), Value::Nil);
}

#[test]
fn test_break_gives_loop_its_value() {
    let source = r#"
        (lasgn i (lit 0))
        (while (call (lvar i) < (lit 5))
          (block
            (lasgn i (call (lvar i) + (lit 1)))
            (if (call (lvar i) == (lit 3)) (break (lvar i)) _)))
    "#;
    assert_eq!(eval(source), Value::Integer(3));
}

#[test]
fn test_next_skips_rest_of_loop_body() {
    let source = r#"
        (lasgn i (lit 0))
        (lasgn sum (lit 0))
        (while (call (lvar i) < (lit 6))
          (block
            (lasgn i (call (lvar i) + (lit 1)))
            (if (call (lvar i) even?) (next) _)
            (lasgn sum (call (lvar sum) + (lvar i)))))
        (lvar sum)
    "#;
    assert_eq!(eval(source), Value::Integer(1 + 3 + 5));
}

#[test]
fn test_until_loop() {
    let source = r#"
        (lasgn n (lit 1))
        (until (call (lvar n) > (lit 100)) (lasgn n (call (lvar n) * (lit 2))))
        (lvar n)
    "#;
    assert_eq!(eval(source), Value::Integer(128));
}

#[test]
fn test_nested_loops_break_only_the_inner_one() {
    let source = r#"
        (lasgn out (array))
        (lasgn i (lit 0))
        (while (call (lvar i) < (lit 2))
          (block
            (lasgn j (lit 0))
            (while (true)
              (block
                (if (call (lvar j) == (lit 2)) (break) _)
                (call (lvar out) << (array (lvar i) (lvar j)))
                (lasgn j (call (lvar j) + (lit 1)))))
            (lasgn i (call (lvar i) + (lit 1)))))
        (lvar out)
    "#;
    assert_eq!(eval_inspect(source), "[[0, 0], [0, 1], [1, 0], [1, 1]]");
}

#[rstest]
#[case("(if (true) (lit 1) (lit 2))", Value::Integer(1))]
#[case("(if (nil) (lit 1) (lit 2))", Value::Integer(2))]
#[case("(if (lit 0) (lit 1) (lit 2))", Value::Integer(1))]
#[case("(if (false) (lit 1) _)", Value::Nil)]
#[case("(and (lit 1) (lit 2))", Value::Integer(2))]
#[case("(and (nil) (lit 2))", Value::Nil)]
#[case("(or (false) (lit 2))", Value::Integer(2))]
#[case("(not (nil))", Value::True)]
fn test_conditionals(#[case] source: &str, #[case] expected: Value) {
    assert_eq!(eval(source), expected);
}

#[rstest]
#[case("(lit 2)", "low")]
#[case("(lit 7)", "int")]
#[case(r#"(str "x")"#, "string")]
#[case("(nil)", "other")]
fn test_case_uses_threequals(#[case] subject: &str, #[case] expected: &str) {
    let source = format!(
        r#"(case {}
             (when (array (dot2 (lit 1) (lit 3))) (str "low"))
             (when (array (const Integer) (const Float)) (str "int"))
             (when (array (const String)) (str "string"))
             (str "other"))"#,
        subject
    );
    assert_eq!(eval(&source), Value::string(expected));
}

#[test]
fn test_case_without_subject_tests_truthiness() {
    let source = r#"
        (lasgn x (lit 5))
        (case _
          (when (array (call (lvar x) < (lit 0))) (sym negative))
          (when (array (call (lvar x) > (lit 0))) (sym positive)))
    "#;
    assert_eq!(eval(source), Value::symbol("positive"));
}

#[test]
fn test_case_without_match_or_else_is_nil() {
    assert_eq!(eval("(case (lit 1) (when (array (lit 2)) (lit 3)))"), Value::Nil);
}

#[test]
fn test_multiple_assignment_with_suffix_after_splat() {
    let source = r#"
        (masgn (array (lasgn a) (splat (lasgn b)) (lasgn c) (lasgn d))
          (array (lit 1) (lit 2) (lit 3) (lit 4) (lit 5)))
        (lasgn long (array (lvar a) (lvar b) (lvar c) (lvar d)))
        (masgn (array (lasgn a) (splat (lasgn b)) (lasgn c) (lasgn d)) (array (lit 1) (lit 2)))
        (array (lvar long) (array (lvar a) (lvar b) (lvar c) (lvar d)))
    "#;
    assert_eq!(eval_inspect(source), "[[1, [2, 3], 4, 5], [1, [], 2, nil]]");
}

#[test]
fn test_next_in_loop_runs_ensure() {
    let source = r#"
        (lasgn i (lit 0))
        (lasgn sum (lit 0))
        (lasgn ensured (lit 0))
        (while (call (lvar i) < (lit 3))
          (block
            (lasgn i (call (lvar i) + (lit 1)))
            (ensure
              (block
                (if (call (lvar i) == (lit 2)) (next) _)
                (lasgn sum (call (lvar sum) + (lvar i))))
              (lasgn ensured (call (lvar ensured) + (lit 1))))))
        (array (lvar sum) (lvar ensured))
    "#;
    assert_eq!(eval_inspect(source), "[4, 3]");
}

#[test]
fn test_redo_in_loop_runs_ensure() {
    let source = r#"
        (lasgn i (lit 0))
        (lasgn tries (lit 0))
        (lasgn ensured (lit 0))
        (while (call (lvar i) < (lit 2))
          (block
            (ensure
              (block
                (lasgn tries (call (lvar tries) + (lit 1)))
                (if (call (lvar tries) == (lit 1)) (redo) _))
              (lasgn ensured (call (lvar ensured) + (lit 1))))
            (lasgn i (call (lvar i) + (lit 1)))))
        (array (lvar tries) (lvar ensured))
    "#;
    assert_eq!(eval_inspect(source), "[3, 3]");
}

#[test]
fn test_next_in_block_runs_ensure() {
    let source = r#"
        (gasgn $ensured (lit 0))
        (lasgn mapped
          (iter (call (array (lit 1) (lit 2) (lit 3)) map) (args x)
            (ensure
              (block
                (if (call (lvar x) == (lit 2)) (next (lit 0)) _)
                (lvar x))
              (gasgn $ensured (call (gvar $ensured) + (lit 1))))))
        (array (lvar mapped) (gvar $ensured))
    "#;
    assert_eq!(eval_inspect(source), "[[1, 0, 3], 3]");
}

// ===== Blocks =====

#[test]
fn test_break_from_block_ends_the_iterating_call() {
    let source = r#"
        (iter (call (array (lit 1) (lit 2) (lit 3)) each) (args x)
          (if (call (lvar x) == (lit 2)) (break (call (lvar x) * (lit 10))) _))
    "#;
    assert_eq!(eval(source), Value::Integer(20));
}

#[test]
fn test_break_from_block_skips_the_rest_of_the_method() {
    let source = r#"
        (defn each_twice (args)
          (block
            (yield (lit 1))
            (yield (lit 2))
            (sym finished)))
        (lasgn seen (array))
        (lasgn result
          (iter (call _ each_twice) (args x)
            (block (call (lvar seen) << (lvar x)) (break (sym stopped)))))
        (array (lvar result) (lvar seen))
    "#;
    assert_eq!(eval_inspect(source), "[:stopped, [1]]");
}

#[test]
fn test_next_in_block_supplies_the_block_value() {
    let source = r#"
        (iter (call (array (lit 1) (lit 2) (lit 3)) map) (args x)
          (block
            (if (call (lvar x) == (lit 2)) (next (lit 0)) _)
            (lvar x)))
    "#;
    assert_eq!(eval_inspect(source), "[1, 0, 3]");
}

#[test]
fn test_break_crosses_nested_builtin_calls() {
    let source = r#"
        (defn each_cell (args grid (blockarg blk))
          (block
            (iter (call (lvar grid) each) (args row) (call (lvar row) each (block_pass (lvar blk))))
            (sym exhausted)))
        (lasgn seen (array))
        (lasgn result
          (iter (call _ each_cell (array (array (lit 1) (lit 2)) (array (lit 3) (lit 4)))) (args x)
            (block
              (call (lvar seen) << (lvar x))
              (if (call (lvar x) == (lit 3)) (break (sym found)) _))))
        (array (lvar result) (lvar seen))
    "#;
    assert_eq!(eval_inspect(source), "[:found, [1, 2, 3]]");
}

#[test]
fn test_break_out_of_kernel_loop() {
    let source = r#"
        (lasgn n (lit 0))
        (iter (call _ loop) _
          (block
            (lasgn n (call (lvar n) + (lit 1)))
            (if (call (lvar n) >= (lit 4)) (break (lvar n)) _)))
    "#;
    assert_eq!(eval(source), Value::Integer(4));
}

#[test]
fn test_redo_restarts_the_loop_body() {
    let source = r#"
        (lasgn tries (lit 0))
        (lasgn i (lit 0))
        (while (call (lvar i) < (lit 2))
          (block
            (lasgn tries (call (lvar tries) + (lit 1)))
            (if (call (lvar tries) == (lit 1)) (redo) _)
            (lasgn i (call (lvar i) + (lit 1)))))
        (lvar tries)
    "#;
    assert_eq!(eval(source), Value::Integer(3));
}

#[test]
fn test_times_and_ranges_drive_blocks() {
    let source = r#"
        (lasgn acc (array))
        (iter (call (lit 3) times) (args i) (call (lvar acc) << (lvar i)))
        (iter (call (dot2 (lit 5) (lit 6)) each) (args i) (call (lvar acc) << (lvar i)))
        (lvar acc)
    "#;
    assert_eq!(eval_inspect(source), "[0, 1, 2, 5, 6]");
}

#[test]
fn test_return_from_inside_a_block_leaves_the_method() {
    let source = r#"
        (defn first_even (args items)
          (block
            (iter (call (lvar items) each) (args x)
              (if (call (lvar x) even?) (return (lvar x)) _))
            (nil)))
        (call _ first_even (array (lit 1) (lit 4) (lit 6)))
    "#;
    assert_eq!(eval(source), Value::Integer(4));
}

#[test]
fn test_output_order() {
    let source = r#"
        (iter (call (dot2 (lit 1) (lit 3)) each) (args i) (call _ puts (lvar i)))
        (call _ print (str "a") (str "b"))
        (call _ p (sym c) (str "d"))
    "#;
    assert_eq!(eval_output(source), "1\n2\n3\nab:c\n\"d\"\n");
}

//! Classes, modules, method lookup and the object model

mod common;

use common::*;
#[allow(unused_imports)]
use common::assert_eq;
use garnet_runtime::Value;

#[test]
fn test_instance_variables_and_initialize() {
    let source = r#"
        (class Point _
          (block
            (defn initialize (args x y) (block (iasgn @x (lvar x)) (iasgn @y (lvar y))))
            (defn sum (args) (call (ivar @x) + (ivar @y)))))
        (call (call (const Point) new (lit 3) (lit 4)) sum)
    "#;
    assert_eq!(eval(source), Value::Integer(7));
}

#[test]
fn test_redefinition_is_seen_through_subclass() {
    let source = r#"
        (class Base _ (defn greet (args) (sym old)))
        (class Child (const Base) _)
        (lasgn c (call (const Child) new))
        (lasgn before (call (lvar c) greet))
        (class Base _ (defn greet (args) (sym new)))
        (array (lvar before) (call (lvar c) greet))
    "#;
    assert_eq!(eval_inspect(source), "[:old, :new]");
}

#[test]
fn test_super_walks_one_level_up() {
    let source = r#"
        (class A _ (defn name (args x) (array (sym a) (lvar x))))
        (class B (const A) (defn name (args x) (array (sym b) (super (call (lvar x) + (lit 1))))))
        (class C (const B) (defn name (args x) (array (sym c) (zsuper))))
        (call (call (const C) new) name (lit 1))
    "#;
    assert_eq!(eval_inspect(source), "[:c, [:b, [:a, 2]]]");
}

#[test]
fn test_module_methods_sit_between_class_and_superclass() {
    let source = r#"
        (module Loud (defn speak (args) (call (super) upcase)))
        (class Animal _ (defn speak (args) (str "hi")))
        (class Dog (const Animal) (call _ include (const Loud)))
        (array (call (call (const Dog) new) speak) (call (const Dog) ancestors))
    "#;
    assert_eq!(
        eval_inspect(source),
        r#"["HI", [Dog, Loud, Animal, Object, Kernel, BasicObject]]"#
    );
}

#[test]
fn test_module_included_later_is_visible_to_existing_objects() {
    let source = r#"
        (class Thing _ _)
        (lasgn t (call (const Thing) new))
        (module Extra (defn extra (args) (lit 99)))
        (class Thing _ (call _ include (const Extra)))
        (array (call (lvar t) extra) (call (lvar t) is_a? (const Extra)))
    "#;
    assert_eq!(eval_inspect(source), "[99, true]");
}

#[test]
fn test_attr_accessor() {
    let source = r#"
        (class Box _ (call _ attr_accessor (sym value)))
        (lasgn b (call (const Box) new))
        (lasgn assigned (attrasgn (lvar b) value= (lit 5)))
        (array (lvar assigned) (call (lvar b) value))
    "#;
    assert_eq!(eval_inspect(source), "[5, 5]");
}

#[test]
fn test_private_methods_need_implicit_receiver() {
    let source = r#"
        (class Vault _
          (block
            (defn open (args) (call _ secret))
            (call _ private)
            (defn secret (args) (sym hidden))))
        (lasgn v (call (const Vault) new))
        (call (lvar v) open)
    "#;
    assert_eq!(eval(source), Value::symbol("hidden"));

    let outside = r#"
        (class Vault _ (block (call _ private) (defn secret (args) (sym hidden))))
        (call (call (const Vault) new) secret)
    "#;
    assert_uncaught(
        outside,
        "NoMethodError",
        "private method 'secret' called for an instance of Vault",
    );
}

#[test]
fn test_method_missing_is_consulted() {
    let source = r#"
        (class Ghost _
          (defn method_missing (args name (restarg rest))
            (array (lvar name) (lvar rest))))
        (call (call (const Ghost) new) anything (lit 1) (lit 2))
    "#;
    assert_eq!(eval_inspect(source), "[:anything, [1, 2]]");
}

#[test]
fn test_singleton_methods() {
    let source = r#"
        (class Config _ (defs (self) default (args) (sym defaults)))
        (lasgn obj (call (const Object) new))
        (defs (lvar obj) only_me (args) (lit 1))
        (array
          (call (const Config) default)
          (call (lvar obj) only_me)
          (call (call (const Object) new) respond_to? (sym only_me)))
    "#;
    assert_eq!(eval_inspect(source), "[:defaults, 1, false]");
}

#[test]
fn test_class_methods_are_inherited() {
    let source = r#"
        (class Parent _ (defs (self) make (args) (call _ new)))
        (class Kid (const Parent) _)
        (call (call (call (const Kid) make) class) name)
    "#;
    assert_eq!(eval(source), Value::string("Kid"));
}

#[test]
fn test_singleton_class_body() {
    let source = r#"
        (class Registry _
          (sclass (self) (defn shared (args) (sym from_sclass))))
        (call (const Registry) shared)
    "#;
    assert_eq!(eval(source), Value::symbol("from_sclass"));
}

#[test]
fn test_constants_resolve_lexically_then_by_inheritance() {
    let source = r#"
        (cdecl LIMIT (lit 1))
        (class Outer _
          (block
            (cdecl LIMIT (lit 2))
            (class Inner _ (defn limit (args) (const LIMIT)))))
        (class Base _ (cdecl SIZE (lit 3)))
        (class Derived (const Base) (defn size (args) (const SIZE)))
        (array
          (call (call (colon2 (const Outer) Inner) new) limit)
          (call (call (const Derived) new) size)
          (const LIMIT)
          (colon2 (const Outer) LIMIT))
    "#;
    assert_eq!(eval_inspect(source), "[2, 3, 1, 2]");
}

#[test]
fn test_class_variables_are_shared_with_subclasses() {
    let source = r#"
        (class Counter _
          (block
            (cvasgn @@count (lit 0))
            (defn bump (args) (cvasgn @@count (call (cvar @@count) + (lit 1))))))
        (class SubCounter (const Counter) _)
        (call (call (const Counter) new) bump)
        (call (call (const SubCounter) new) bump)
    "#;
    assert_eq!(eval(source), Value::Integer(2));
}

#[test]
fn test_alias_keeps_the_old_body() {
    let source = r#"
        (class Talker _
          (block
            (defn hello (args) (sym original))
            (alias greet hello)
            (defn hello (args) (sym replaced))))
        (lasgn t (call (const Talker) new))
        (array (call (lvar t) greet) (call (lvar t) hello))
    "#;
    assert_eq!(eval_inspect(source), "[:original, :replaced]");
}

#[test]
fn test_undef_hides_inherited_method() {
    let source = r#"
        (class Quiet _ (undef to_s))
        (call (call (const Quiet) new) to_s)
    "#;
    let err = eval_error(source);
    assert_eq!(err.exception_class(), Some("NoMethodError"));
}

#[test]
fn test_superclass_mismatch() {
    let source = r#"
        (class Animal _ _)
        (class Plant _ _)
        (class Animal (const Plant) _)
    "#;
    assert_uncaught(source, "TypeError", "superclass mismatch for class Animal");
}

#[test]
fn test_send_and_respond_to() {
    let source = r#"
        (array
          (call (lit 2) send (sym +) (lit 3))
          (call (lit 2) respond_to? (sym times))
          (call (lit 2) respond_to? (sym nope)))
    "#;
    assert_eq!(eval_inspect(source), "[5, true, false]");
}

#[test]
fn test_instance_eval_and_class_eval() {
    let source = r#"
        (class Holder _ (defn initialize (args) (iasgn @secret (lit 42))))
        (iter (call (const Holder) class_eval) _ (defn peek (args) (ivar @secret)))
        (lasgn h (call (const Holder) new))
        (array
          (call (lvar h) peek)
          (iter (call (lvar h) instance_eval) _ (ivar @secret)))
    "#;
    assert_eq!(eval_inspect(source), "[42, 42]");
}

#[test]
fn test_object_inspect_lists_ivars() {
    let source = r#"
        (class Pair _ (defn initialize (args) (block (iasgn @b (lit 2)) (iasgn @a (str "x")))))
        (call (call (const Pair) new) inspect)
    "#;
    assert_eq!(eval(source), Value::string(r#"#<Pair @a="x", @b=2>"#));
}

#[test]
fn test_extend_adds_singleton_methods() {
    let source = r#"
        (module Shouty (defn shout (args) (sym loud)))
        (lasgn o (call (const Object) new))
        (call (lvar o) extend (const Shouty))
        (call (lvar o) shout)
    "#;
    assert_eq!(eval(source), Value::symbol("loud"));
}

#[test]
fn test_top_level_methods_are_private() {
    let source = r#"
        (defn helper (args) (lit 1))
        (call (lit 5) helper)
    "#;
    let err = eval_error(source);
    assert_eq!(err.exception_class(), Some("NoMethodError"));
}

// ===== Hash keys =====

#[test]
fn test_large_hash_keeps_order_through_deletes() {
    let source = r#"
        (lasgn h (hash))
        (iter (call (lit 500) times) (args i) (attrasgn (lvar h) []= (call (lvar i) to_s) (lvar i)))
        (call (lvar h) delete (str "3"))
        (call (lvar h) delete (str "0"))
        (array
          (call (lvar h) size)
          (call (lvar h) [] (str "499"))
          (call (lvar h) [] (str "3"))
          (call (call (lvar h) keys) first)
          (call (call (lvar h) values) last))
    "#;
    assert_eq!(eval_inspect(source), r#"[498, 499, nil, "1", 499]"#);
}

#[test]
fn test_lookup_survives_eql_that_changes_the_hash() {
    let source = r#"
        (class Key _
          (block
            (defn initialize (args n) (iasgn @n (lvar n)))
            (defn n (args) (ivar @n))
            (defn hash (args) (lit 1))
            (defn eql? (args other)
              (block
                (if (gvar $armed) (call (gvar $table) delete (sym first)) _)
                (call (ivar @n) == (call (lvar other) n))))))
        (gasgn $table
          (hash
            (sym first) (lit 0)
            (call (const Key) new (lit 1)) (sym one)
            (call (const Key) new (lit 2)) (sym two)))
        (gasgn $armed (true))
        (array
          (call (gvar $table) [] (call (const Key) new (lit 2)))
          (call (gvar $table) size))
    "#;
    assert_eq!(eval_inspect(source), "[:two, 2]");
}

// Tests for values, equality and string interning.

use crate::gc::{GC, ObjectPool};
use crate::test::{new_vm, run_ok};
use crate::value::{Value, number_to_string};

#[test]
fn falsey_values() {
    assert!(Value::Nil.is_falsey());
    assert!(Value::Bool(false).is_falsey());
    assert!(Value::Bool(true).is_truthy());
    assert!(Value::Number(0.0).is_truthy());
}

#[test]
fn number_equality_follows_ieee() {
    assert_eq!(Value::Number(-0.0), Value::Number(0.0));
    assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
}

#[test]
fn cross_type_equality_is_false() {
    assert_ne!(Value::Nil, Value::Bool(false));
    assert_ne!(Value::Number(1.0), Value::Bool(true));
}

#[test]
fn number_rendering() {
    assert_eq!(number_to_string(14.0), "14");
    assert_eq!(number_to_string(-3.0), "-3");
    assert_eq!(number_to_string(2.5), "2.5");
    assert_eq!(number_to_string(f64::INFINITY), "inf");
}

#[test]
fn copy_string_interns_by_content() {
    let mut pool = ObjectPool::new();
    let mut gc = GC::new();

    let a = pool.copy_string(&mut gc, "hello");
    let b = pool.copy_string(&mut gc, "hello");
    assert_eq!(a, b);

    let c = pool.copy_string(&mut gc, "world");
    assert_ne!(a, c);
}

#[test]
fn take_string_hits_the_intern_table() {
    let mut pool = ObjectPool::new();
    let mut gc = GC::new();

    let a = pool.copy_string(&mut gc, "shared");
    let b = pool.take_string(&mut gc, String::from("shared"));
    assert_eq!(a, b);
    assert_eq!(pool.strings.len(), 1);
}

#[test]
fn runtime_strings_share_identity() {
    // Strings built at runtime compare equal to literals because the intern
    // pool collapses them to one object.
    run_ok(
        r#"
        local a = "he" .. "llo"
        local b = "hello"
        assert(a == b)
    "#,
    );
}

#[test]
fn equality_reflexive_in_language() {
    run_ok(
        r#"
        assert(nil == nil)
        assert(true == true)
        assert(1.5 == 1.5)
        assert("x" == "x")
        local t = {}
        assert(t == t)
    "#,
    );
}

#[test]
fn table_identity_not_structural() {
    run_ok(
        r#"
        local a = {}
        local b = {}
        assert(a ~= b)
    "#,
    );
}

#[test]
fn display_value_renders_objects() {
    let mut vm = new_vm();
    let s = vm.copy_string_value("abc");
    assert_eq!(vm.pool.display_value(s), "abc");
    assert_eq!(vm.pool.display_value(Value::Nil), "nil");
    assert_eq!(vm.pool.display_value(Value::Bool(true)), "true");
    assert_eq!(vm.pool.display_value(Value::Number(7.0)), "7");
}

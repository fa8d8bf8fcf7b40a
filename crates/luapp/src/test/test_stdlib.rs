// Runtime library natives.

use crate::lua_vm::LuaError;
use crate::test::{new_vm, run_ok};

#[test]
fn type_names() {
    run_ok(
        r#"
        assert(type(nil) == "nil")
        assert(type(true) == "boolean")
        assert(type(42) == "number")
        assert(type("hello") == "string")
        assert(type({}) == "table")
        assert(type(print) == "function")
        function f() end
        assert(type(f) == "function")
    "#,
    );
}

#[test]
fn tonumber_parses_or_returns_nil() {
    run_ok(
        r#"
        assert(tonumber(42) == 42)
        assert(tonumber("123") == 123)
        assert(tonumber("3.5") == 3.5)
        assert(tonumber("1e2") == 100)
        assert(tonumber("not a number") == nil)
        assert(tonumber(nil) == nil)
        assert(tonumber({}) == nil)
    "#,
    );
}

#[test]
fn tostring_renders_values() {
    run_ok(
        r#"
        assert(tostring(123) == "123")
        assert(tostring(1.5) == "1.5")
        assert(tostring(true) == "true")
        assert(tostring(false) == "false")
        assert(tostring(nil) == "nil")
        assert(tostring("already") == "already")
    "#,
    );
}

#[test]
fn assert_passes_through_truthy_values() {
    run_ok(
        r#"
        assert(assert(42) == 42)
        assert(assert("") == "")
        assert(assert(0) == 0)
    "#,
    );
}

#[test]
fn assert_raises_on_falsey() {
    let mut vm = new_vm();
    let result = vm.execute_string(r#"assert(false, "should fail")"#);
    match result {
        Err(LuaError::Runtime(message)) => assert_eq!(message, "should fail"),
        other => panic!("expected runtime error, got {:?}", other.err()),
    }

    let mut vm = new_vm();
    let result = vm.execute_string("assert(nil)");
    match result {
        Err(LuaError::Runtime(message)) => assert_eq!(message, "assertion failed!"),
        other => panic!("expected runtime error, got {:?}", other.err()),
    }
}

#[test]
fn error_raises_with_message() {
    let mut vm = new_vm();
    let result = vm.execute_string(r#"error("boom")"#);
    match result {
        Err(LuaError::Runtime(message)) => assert_eq!(message, "boom"),
        other => panic!("expected runtime error, got {:?}", other.err()),
    }
}

#[test]
fn rawget_and_rawset() {
    run_ok(
        r#"
        local t = {}
        assert(rawset(t, "k", 5) == t)
        assert(rawget(t, "k") == 5)
        rawset(t, 1, "first")
        assert(rawget(t, 1) == "first")
        assert(rawget(t, "missing") == nil)
        assert(rawget(5, "k") == nil)
    "#,
    );
}

#[test]
fn pairs_and_ipairs_return_the_table() {
    run_ok(
        r#"
        local t = { 1, 2 }
        assert(pairs(t) == t)
        assert(ipairs(t) == t)
    "#,
    );
}

#[test]
fn next_walks_array_then_hash() {
    run_ok(
        r#"
        local t = { 10, 20, x = 1 }
        local p = next(t)
        assert(p[1] == 1)
        assert(p[2] == 10)
        p = next(t, p[1])
        assert(p[1] == 2)
        assert(p[2] == 20)
        p = next(t, p[1])
        assert(p[1] == "x")
        assert(p[2] == 1)
        assert(next(t, p[1]) == nil)
    "#,
    );
}

#[test]
fn next_on_empty_table_is_nil() {
    run_ok("assert(next({}) == nil)");
}

#[test]
fn next_skips_nil_array_padding() {
    run_ok(
        r#"
        local t = {}
        t[3] = "c"
        local p = next(t)
        assert(p[1] == 3)
        assert(p[2] == "c")
        assert(next(t, p[1]) == nil)
    "#,
    );
}

#[test]
fn next_drives_a_full_iteration() {
    run_ok(
        r#"
        local t = { 5, 6, a = 7, b = 8 }
        local sum = 0
        local count = 0
        local p = next(t)
        while p ~= nil do
            sum = sum + p[2]
            count = count + 1
            p = next(t, p[1])
        end
        assert(count == 4)
        assert(sum == 26)
    "#,
    );
}

#[test]
fn require_missing_module_returns_nil() {
    run_ok(r#"assert(require("definitely_missing_module_for_tests") == nil)"#);
}

#[test]
fn print_accepts_anything() {
    // Smoke test: printing every kind of value must not fail.
    run_ok(
        r#"
        print()
        print(1, "two", true, nil, {}, print)
        class C end
        print(C, new C())
    "#,
    );
}

// Core language behavior: expressions, control flow, functions, errors.

use crate::lua_vm::{InterpretResult, LuaError};
use crate::test::{call_global_number, new_vm, run_ok};

#[test]
fn arithmetic_precedence() {
    run_ok(
        r#"
        local x = 2 + 3 * 4
        assert(x == 14)
        assert((2 + 3) * 4 == 20)
        assert(10 - 4 - 3 == 3)
        assert(2 * 3 % 4 == 2)
    "#,
    );
}

#[test]
fn recursion() {
    run_ok(
        r#"
        function fact(n)
            if n <= 1 then return 1 end
            return n * fact(n - 1)
        end
        assert(fact(5) == 120)
    "#,
    );
}

#[test]
fn if_elseif_else_chain() {
    run_ok(
        r#"
        function grade(n)
            if n >= 90 then return "a"
            elseif n >= 80 then return "b"
            elseif n >= 70 then return "c"
            else return "f"
            end
        end
        assert(grade(95) == "a")
        assert(grade(85) == "b")
        assert(grade(72) == "c")
        assert(grade(10) == "f")
    "#,
    );
}

#[test]
fn while_loop_with_body_locals() {
    // Body locals live one iteration and are popped before the back-edge.
    run_ok(
        r#"
        local n = 0
        local total = 0
        while n < 5 do
            local doubled = n * 2
            total = total + doubled
            n = n + 1
        end
        assert(n == 5)
        assert(total == 20)
    "#,
    );
}

#[test]
fn numeric_for_loop() {
    run_ok(
        r#"
        local sum = 0
        for i = 1, 10 do
            sum = sum + i
        end
        assert(sum == 55)

        local stepped = 0
        for i = 0, 10, 2 do
            stepped = stepped + i
        end
        assert(stepped == 30)
    "#,
    );
}

#[test]
fn repeat_until_runs_body_at_least_once() {
    run_ok(
        r#"
        local i = 0
        repeat
            i = i + 1
        until i >= 3
        assert(i == 3)

        local once = 0
        repeat
            once = once + 1
        until true
        assert(once == 1)
    "#,
    );
}

#[test]
fn break_leaves_the_loop() {
    run_ok(
        r#"
        local i = 0
        while true do
            i = i + 1
            if i == 4 then break end
        end
        assert(i == 4)
    "#,
    );
}

#[test]
fn continue_skips_to_the_increment() {
    run_ok(
        r#"
        local evens = 0
        for i = 1, 10 do
            if i % 2 == 1 then continue end
            evens = evens + i
        end
        assert(evens == 30)

        local n = 0
        local hits = 0
        while n < 6 do
            n = n + 1
            if n % 3 ~= 0 then continue end
            hits = hits + 1
        end
        assert(hits == 2)
    "#,
    );
}

#[test]
fn break_pops_body_locals() {
    run_ok(
        r#"
        local kept = 1
        for i = 1, 10 do
            local junk = i * 100
            if i == 2 then break end
        end
        assert(kept == 1)
    "#,
    );
}

#[test]
fn short_circuit_and_or() {
    run_ok(
        r#"
        local called = false
        function f()
            called = true
            return true
        end
        local x = true or f()
        assert(x == true)
        assert(called == false)

        local y = false and f()
        assert(y == false)
        assert(called == false)

        local z = false or f()
        assert(z == true)
        assert(called == true)
    "#,
    );
}

#[test]
fn and_or_yield_operand_values() {
    run_ok(
        r#"
        assert((nil or "fallback") == "fallback")
        assert((1 and 2) == 2)
        assert((nil and 2) == nil)
        assert((false or nil) == nil)
    "#,
    );
}

#[test]
fn lexical_scoping_restores_shadowed_local() {
    run_ok(
        r#"
        local x = 1
        do
            local x = 2
            assert(x == 2)
        end
        assert(x == 1)
    "#,
    );
}

#[test]
fn do_block_scopes_locals() {
    run_ok(
        r#"
        local seen = nil
        do
            local inner = "here"
            seen = inner
        end
        assert(seen == "here")
    "#,
    );
}

#[test]
fn concat_and_length() {
    run_ok(
        r#"
        local a = "foo"
        assert(a .. "bar" == "foobar")
        assert(#"hello" == 5)
        assert(#"" == 0)
    "#,
    );
}

#[test]
fn modulo_truncates_operands() {
    run_ok(
        r#"
        assert(7 % 3 == 1)
        local a = 7.9
        local b = 2.9
        assert(a % b == 1)
    "#,
    );
}

// ============ Runtime errors ============

fn expect_runtime_error(source: &str) {
    let mut vm = new_vm();
    match vm.execute_string(source) {
        Err(LuaError::Runtime(_)) => {}
        other => panic!("expected runtime error, got {:?}", other.err()),
    }
}

#[test]
fn arithmetic_on_non_numbers_fails() {
    expect_runtime_error(r#"local x = "a" + 1"#);
    expect_runtime_error(r#"local x = -"a""#);
}

#[test]
fn concat_on_non_strings_fails() {
    expect_runtime_error("local x = 1 .. 2");
}

#[test]
fn modulo_by_zero_fails() {
    expect_runtime_error("local a = 5 local b = 0 local x = a % b");
}

#[test]
fn undefined_global_read_fails() {
    expect_runtime_error("local x = definitely_not_defined");
}

#[test]
fn assignment_to_undefined_global_fails() {
    expect_runtime_error("undefined_target = 1");
}

#[test]
fn calling_a_non_callable_fails() {
    expect_runtime_error("local x = 5 x()");
}

#[test]
fn arity_mismatch_fails() {
    expect_runtime_error("function f(a, b) return a end f(1)");
    expect_runtime_error("function f(a) return a end f(1, 2)");
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    expect_runtime_error("function f() return f() end f()");
}

#[test]
fn vm_is_usable_after_a_runtime_error() {
    let mut vm = new_vm();
    assert_eq!(
        vm.interpret("function f(a) return a end f(1, 2)"),
        InterpretResult::RuntimeError
    );
    // The stack was reset; further programs run normally.
    assert_eq!(vm.interpret("assert(1 + 1 == 2)"), InterpretResult::Ok);
}

#[test]
fn results_survive_between_interprets() {
    let mut vm = new_vm();
    assert_eq!(
        vm.interpret("function double(n) return n * 2 end"),
        InterpretResult::Ok
    );
    assert_eq!(
        vm.interpret("assert(double(21) == 42)"),
        InterpretResult::Ok
    );
}

#[test]
fn call_function_from_rust() {
    let mut vm = run_ok("function add(a, b) return a + b end");
    let add = vm.get_global("add").unwrap();
    let result = vm
        .call_function(add, &[crate::value::Value::Number(2.0), crate::value::Value::Number(40.0)])
        .unwrap();
    assert_eq!(result, crate::value::Value::Number(42.0));
}

#[test]
fn exported_accessor_reads_script_state() {
    let mut vm = run_ok(
        r#"
        local counter = 10
        function bump() counter = counter + 1 return counter end
    "#,
    );
    assert_eq!(call_global_number(&mut vm, "bump"), 11.0);
    assert_eq!(call_global_number(&mut vm, "bump"), 12.0);
}

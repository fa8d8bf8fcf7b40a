// Compiler tests: errors, limits, and constant folding.

use crate::lua_vm::LuaError;
use crate::test::{new_vm, run_ok};

fn compile_fails(source: &str) {
    let mut vm = new_vm();
    match vm.compile(source) {
        Err(LuaError::Compile(_)) => {}
        other => panic!("expected compile error, got {:?}", other.err()),
    }
}

#[test]
fn break_outside_loop_is_an_error() {
    compile_fails("break");
}

#[test]
fn continue_outside_loop_is_an_error() {
    compile_fails("continue");
}

#[test]
fn break_inside_nested_function_does_not_see_outer_loop() {
    // Each function context gets its own loop stack.
    compile_fails(
        r#"
        while true do
            function f()
                break
            end
        end
    "#,
    );
}

#[test]
fn return_at_top_level_is_an_error() {
    compile_fails("return 1");
}

#[test]
fn self_outside_class_is_an_error() {
    compile_fails("print(self)");
}

#[test]
fn super_without_superclass_is_an_error() {
    compile_fails(
        r#"
        class A
            function m()
                return super.m()
            end
        end
    "#,
    );
}

#[test]
fn class_cannot_extend_itself() {
    compile_fails("class A extends A end");
}

#[test]
fn initializer_cannot_return_a_value() {
    compile_fails(
        r#"
        class A
            function init()
                return 1
            end
        end
    "#,
    );
}

#[test]
fn invalid_assignment_target() {
    compile_fails("local a = 1 local b = 2 a + b = 3");
}

#[test]
fn redeclaration_in_same_scope_is_an_error() {
    compile_fails("do local x = 1 local x = 2 end");
}

#[test]
fn local_cannot_read_itself_in_initializer() {
    compile_fails("do local x = x end");
}

#[test]
fn too_many_locals() {
    let mut source = String::from("function f()\n");
    for i in 0..300 {
        source.push_str(&format!("local v{i} = {i}\n"));
    }
    source.push_str("end\n");
    compile_fails(&source);
}

#[test]
fn too_many_constants() {
    // Each distinct number is one pool entry; TABLE_ADD keeps the folder out.
    let mut source = String::from("local t = {");
    for i in 0..300 {
        source.push_str(&format!("{}.5, ", i));
    }
    source.push_str("}");
    compile_fails(&source);
}

#[test]
fn jump_offset_past_u16_max() {
    // A then-branch bigger than 65535 bytes of code pushes the forward jump
    // past its 16-bit offset. Each `x = x` statement emits five bytes and
    // touches no new constants or locals, so only the jump limit trips.
    let mut source = String::from("local x = 0\nif x == 0 then\n");
    for _ in 0..20_000 {
        source.push_str("x = x\n");
    }
    source.push_str("end\n");
    compile_fails(&source);
}

#[test]
fn errors_accumulate_and_synchronize() {
    // Two statements with independent errors both get reported; the result
    // is still a compile failure.
    compile_fails("break\ncontinue\n");
}

// ============ Constant folding ============

/// The folded value of a closed constant expression must match evaluating
/// the same expression built from runtime variables the folder cannot see.
fn assert_fold_matches(expr: &str, operands: &str, unfolded: &str) {
    run_ok(&format!(
        "local folded = {expr}\n{operands}\nlocal runtime = {unfolded}\nassert(folded == runtime)"
    ));
}

#[test]
fn fold_arithmetic_chain() {
    assert_fold_matches(
        "2 + 3 * 4",
        "local a = 2 local b = 3 local c = 4",
        "a + b * c",
    );
}

#[test]
fn fold_unary_minus() {
    assert_fold_matches("-(5 - 2)", "local a = 5 local b = 2", "-(a - b)");
}

#[test]
fn fold_division_and_modulo() {
    assert_fold_matches("10 / 4", "local a = 10 local b = 4", "a / b");
    assert_fold_matches("10 % 3", "local a = 10 local b = 3", "a % b");
    // Modulo truncates both operands.
    assert_fold_matches("7.9 % 2.9", "local a = 7.9 local b = 2.9", "a % b");
}

#[test]
fn fold_comparisons_and_not() {
    run_ok(
        r#"
        assert((3 < 4) == true)
        assert((3 >= 4) == false)
        assert((2 <= 2) == true)
        assert((5 > 1) == true)
        assert((1 == 2) == false)
        assert((1 ~= 2) == true)
        assert((not nil) == true)
        assert((not 0) == false)
    "#,
    );
}

#[test]
fn fold_string_concat() {
    run_ok(
        r#"
        local folded = "foo" .. "bar" .. "baz"
        local a = "foo"
        local b = "bar"
        local c = "baz"
        assert(folded == a .. b .. c)
        assert(folded == "foobarbaz")
    "#,
    );
}

#[test]
fn fold_boolean_and_nil_equality() {
    run_ok(
        r#"
        assert((true == true) == true)
        assert((nil == false) == false)
        assert((nil ~= false) == true)
        assert(("a" == "a") == true)
    "#,
    );
}

#[test]
fn division_by_zero_is_not_folded() {
    // Passes through to the runtime, where IEEE division applies.
    run_ok(
        r#"
        local inf = 1 / 0
        assert(inf > 1e308)
        local ninf = -1 / 0
        assert(ninf < -1e308)
    "#,
    );
}

#[test]
fn unused_variable_warns_but_compiles() {
    // Warnings are not fatal; underscore names are exempt.
    run_ok("local _ignored = 1 local used = 2 assert(used == 2)\n");
}

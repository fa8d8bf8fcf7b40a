// Closures and upvalues: capture, sharing, closing on scope exit.

use crate::test::run_ok;

#[test]
fn closure_counter() {
    run_ok(
        r#"
        function mk()
            local c = 0
            function inc()
                c = c + 1
                return c
            end
            return inc
        end
        local a = mk()
        assert(a() == 1)
        assert(a() == 2)
        assert(a() == 3)
    "#,
    );
}

#[test]
fn two_closures_share_one_upvalue() {
    // Open-upvalue dedup: both closures observe each other's assignments.
    run_ok(
        r#"
        function make()
            local v = 0
            function get() return v end
            function set(x) v = x end
            return { get, set }
        end
        local fns = make()
        fns[2](42)
        assert(fns[1]() == 42)
        fns[2](7)
        assert(fns[1]() == 7)
    "#,
    );
}

#[test]
fn independent_instances_get_independent_upvalues() {
    run_ok(
        r#"
        function counter()
            local c = 0
            function inc() c = c + 1 return c end
            return inc
        end
        local a = counter()
        local b = counter()
        assert(a() == 1)
        assert(a() == 2)
        assert(b() == 1)
    "#,
    );
}

#[test]
fn upvalue_closed_when_block_exits() {
    run_ok(
        r#"
        local captured = nil
        for i = 1, 3 do
            local value = i * 10
            if i == 2 then
                function snapshot() return value end
                captured = snapshot
            end
        end
        assert(captured() == 20)
    "#,
    );
}

#[test]
fn capture_through_intermediate_function() {
    // Transitive capture threads upvalues through the middle function.
    run_ok(
        r#"
        function outer()
            local x = "found"
            function middle()
                function inner()
                    return x
                end
                return inner
            end
            return middle()
        end
        assert(outer()() == "found")
    "#,
    );
}

#[test]
fn assignment_through_upvalue_writes_the_stack_slot() {
    // While the variable is still live on the stack, the closure writes
    // through to it.
    run_ok(
        r#"
        local seen = nil
        do
            local slot = 1
            function poke() slot = 99 end
            poke()
            seen = slot
        end
        assert(seen == 99)
    "#,
    );
}

#[test]
fn local_function_can_recurse() {
    run_ok(
        r#"
        local function fib(n)
            if n < 2 then return n end
            return fib(n - 1) + fib(n - 2)
        end
        assert(fib(10) == 55)
    "#,
    );
}

#[test]
fn closure_survives_creating_scope() {
    run_ok(
        r#"
        function maker()
            local secret = "kept"
            local function reveal() return secret end
            return reveal
        end
        local f = maker()
        assert(f() == "kept")
    "#,
    );
}

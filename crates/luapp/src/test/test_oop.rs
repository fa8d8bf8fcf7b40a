// Classes, inheritance, traits, instances and method dispatch.

use crate::lua_vm::LuaError;
use crate::test::{new_vm, run_ok};

#[test]
fn class_with_init_and_fields() {
    run_ok(
        r#"
        class Point
            function init(x, y)
                self.x = x
                self.y = y
            end
            function sum()
                return self.x + self.y
            end
        end
        local p = new Point(3, 4)
        assert(p.x == 3)
        assert(p.y == 4)
        assert(p:sum() == 7)
    "#,
    );
}

#[test]
fn init_returns_self_implicitly() {
    run_ok(
        r#"
        class Box
            function init(v)
                self.v = v
            end
        end
        local b = new Box(9)
        assert(b.v == 9)
        assert(type(b) == "instance")
    "#,
    );
}

#[test]
fn class_without_init_rejects_arguments() {
    let mut vm = new_vm();
    let result = vm.execute_string(
        r#"
        class Empty end
        local e = new Empty(1)
    "#,
    );
    assert!(matches!(result, Err(LuaError::Runtime(_))));
}

#[test]
fn init_arity_is_checked() {
    let mut vm = new_vm();
    let result = vm.execute_string(
        r#"
        class Pair
            function init(a, b) self.a = a self.b = b end
        end
        local p = new Pair(1)
    "#,
    );
    assert!(matches!(result, Err(LuaError::Runtime(_))));
}

#[test]
fn inheritance_with_super() {
    run_ok(
        r#"
        class A
            function greet()
                return "A"
            end
        end
        class B extends A
            function greet()
                return super.greet() .. "/B"
            end
        end
        assert((new B()):greet() == "A/B")
    "#,
    );
}

#[test]
fn inherited_methods_are_copied_down() {
    run_ok(
        r#"
        class Animal
            function legs() return 4 end
            function noise() return "..." end
        end
        class Dog extends Animal
            function noise() return "woof" end
        end
        local d = new Dog()
        assert(d:legs() == 4)
        assert(d:noise() == "woof")
    "#,
    );
}

#[test]
fn super_method_binding_via_property() {
    run_ok(
        r#"
        class Base
            function name() return "base" end
        end
        class Derived extends Base
            function name() return "derived" end
            function parent_name()
                local m = super.name
                return m()
            end
        end
        assert((new Derived()):parent_name() == "base")
    "#,
    );
}

#[test]
fn fields_shadow_methods_on_invoke() {
    run_ok(
        r#"
        class Thing
            function init()
                self.describe = mine
            end
            function describe() return "method" end
        end
        function mine() return "field" end
        local t = new Thing()
        assert(t:describe() == "field")
    "#,
    );
}

#[test]
fn bound_method_carries_its_receiver() {
    run_ok(
        r#"
        class Greeter
            function init(name) self.name = name end
            function greet() return "hi " .. self.name end
        end
        local g = new Greeter("ada")
        local m = g.greet
        assert(m() == "hi ada")
    "#,
    );
}

#[test]
fn methods_see_updated_fields() {
    run_ok(
        r#"
        class Counter
            function init() self.n = 0 end
            function bump() self.n = self.n + 1 end
            function value() return self.n end
        end
        local c = new Counter()
        c:bump()
        c:bump()
        assert(c:value() == 2)
    "#,
    );
}

#[test]
fn undefined_method_is_a_runtime_error() {
    let mut vm = new_vm();
    let result = vm.execute_string(
        r#"
        class A end
        local a = new A()
        a:missing()
    "#,
    );
    assert!(matches!(result, Err(LuaError::Runtime(_))));
}

#[test]
fn property_access_on_non_instance_fails() {
    let mut vm = new_vm();
    let result = vm.execute_string("local x = 5 local y = x.field");
    assert!(matches!(result, Err(LuaError::Runtime(_))));
}

#[test]
fn traits_merge_methods_into_classes() {
    run_ok(
        r#"
        trait Walks
            function walk() return "walking" end
        end
        trait Swims
            function swim() return "swimming" end
        end
        class Duck implements Walks, Swims
            function quack() return "quack" end
        end
        local d = new Duck()
        assert(d:walk() == "walking")
        assert(d:swim() == "swimming")
        assert(d:quack() == "quack")
    "#,
    );
}

#[test]
fn class_methods_override_trait_methods() {
    // Traits are merged before the class body's methods are installed.
    run_ok(
        r#"
        trait Sound
            function noise() return "generic" end
        end
        class Cat implements Sound
            function noise() return "meow" end
        end
        assert((new Cat()):noise() == "meow")
    "#,
    );
}

#[test]
fn trait_methods_can_use_self() {
    run_ok(
        r#"
        trait Named
            function describe() return "I am " .. self.name end
        end
        class Person implements Named
            function init(name) self.name = name end
        end
        assert((new Person("bo")):describe() == "I am bo")
    "#,
    );
}

#[test]
fn private_methods_are_recorded_and_callable() {
    run_ok(
        r#"
        class Vault
            private function combination() return 1234 end
            function open() return self:combination() end
        end
        assert((new Vault()):open() == 1234)
    "#,
    );
}

#[test]
fn local_class_in_function_scope() {
    run_ok(
        r#"
        function build()
            class Helper
                function ping() return "pong" end
            end
            return Helper
        end
        build()
    "#,
    );
}

#[test]
fn instance_type_names() {
    run_ok(
        r#"
        class C end
        trait T end
        assert(type(C) == "class")
        assert(type(T) == "trait")
        assert(type(new C()) == "instance")
    "#,
    );
}

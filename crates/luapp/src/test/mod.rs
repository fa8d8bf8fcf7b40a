// Test module organization

pub mod test_basic;
pub mod test_closures;
pub mod test_compiler;
pub mod test_lexer;
pub mod test_oop;
pub mod test_stdlib;
pub mod test_table;
pub mod test_value;

use crate::lua_vm::{LuaVM, VmOptions};

/// Fresh VM with the runtime library loaded.
pub fn new_vm() -> Box<LuaVM> {
    let mut vm = LuaVM::new(VmOptions::default());
    vm.open_libs();
    vm
}

/// Run a program that is expected to succeed and hand back the VM for
/// inspecting globals.
pub fn run_ok(source: &str) -> Box<LuaVM> {
    let mut vm = new_vm();
    let result = vm.execute_string(source);
    assert!(result.is_ok(), "program failed: {:?}", result.err());
    vm
}

/// Call a zero-argument global function and return its result. Scripts
/// export values to tests through such accessors, since plain assignment
/// cannot create globals.
pub fn call_global(vm: &mut LuaVM, name: &str) -> crate::value::Value {
    let callee = vm
        .get_global(name)
        .unwrap_or_else(|| panic!("global '{name}' is not defined"));
    vm.call_function(callee, &[])
        .unwrap_or_else(|e| panic!("calling {name}() failed: {e}"))
}

/// Call a zero-argument global function expected to return a number.
pub fn call_global_number(vm: &mut LuaVM, name: &str) -> f64 {
    call_global(vm, name)
        .as_number()
        .unwrap_or_else(|| panic!("{name}() did not return a number"))
}

// Lua++ Runtime
// A Lua-flavored scripting language with classes and traits: single-pass
// bytecode compiler, stack-based VM and precise mark-sweep GC.

#[cfg(test)]
mod test;

pub mod compiler;
pub mod diagnostic;
pub mod gc;
pub mod lib_registry;
pub mod lua_vm;
pub mod stdlib;
pub mod value;

pub use gc::ObjectPool;
pub use lib_registry::LibraryRegistry;
pub use lua_vm::{
    DebugFlags, InterpretResult, LuaError, LuaResult, LuaVM, OpCode, VmOptions,
};
pub use value::{Chunk, Table, Value};

pub const LUAPP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compile and run a program in a fresh VM with the standard library loaded.
pub fn execute(source: &str) -> LuaResult<Value> {
    let mut vm = LuaVM::new(VmOptions::default());
    vm.open_libs();
    vm.execute_string(source)
}

/// Compile and run against an existing VM instance.
pub fn execute_with_vm(vm: &mut LuaVM, source: &str) -> LuaResult<Value> {
    vm.execute_string(source)
}

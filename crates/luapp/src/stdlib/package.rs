// Module loading: the `require` native.
//
// require(name) searches ./name.luapp, ./lib/name.luapp and ./stdlib/name.luapp,
// runs the first match as a top-level program in this VM, and returns a table
// of the globals the module defined (pre-existing globals are excluded).
// Results are cached per VM, so a module body runs at most once.

use std::path::PathBuf;

use ahash::AHashSet;

use crate::gc::StringId;
use crate::lib_registry::LibraryModule;
use crate::lua_vm::{LuaResult, LuaVM};
use crate::value::Value;

const SEARCH_DIRS: [&str; 3] = [".", "./lib", "./stdlib"];

pub fn create_package_lib() -> LibraryModule {
    crate::lib_module!("package", {
        "require" => lua_require,
    })
}

fn resolve(name: &str) -> Option<PathBuf> {
    for dir in SEARCH_DIRS {
        let candidate = PathBuf::from(dir).join(format!("{name}.luapp"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// require(name) - load and run a module, returning its globals as a table.
fn lua_require(vm: &mut LuaVM, args: &[Value]) -> LuaResult<Value> {
    let Some(name_id) = args.first().and_then(|v| v.as_string_id()) else {
        eprintln!("require: expected module name string");
        return Ok(Value::Nil);
    };
    let name = vm.pool.string(name_id).to_string();

    if let Some(&cached) = vm.modules.get(&name) {
        return Ok(cached);
    }

    let Some(path) = resolve(&name) else {
        eprintln!("require: module '{name}' not found");
        return Ok(Value::Nil);
    };
    let source = match std::fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("require: could not read '{}': {err}", path.display());
            return Ok(Value::Nil);
        }
    };

    let function = match vm.compile_with_name(&source, &path.display().to_string()) {
        Ok(function) => function,
        Err(_) => {
            eprintln!("require: module '{name}' failed to compile");
            return Ok(Value::Nil);
        }
    };

    // Globals present before the module runs are not part of its exports.
    let before: AHashSet<StringId> = vm.globals.iter().map(|(key, _)| key).collect();

    // Run the module body to completion in nested frames. A runtime error
    // inside the module aborts the whole program, as it would anywhere else.
    let floor = vm.frames.len();
    vm.push(Value::function(function));
    let closure = vm.new_closure(function);
    vm.pop();
    vm.push(Value::closure(closure));
    vm.call_closure(closure, 0)?;
    vm.run(floor)?;

    let exported: Vec<(StringId, Value)> = vm
        .globals
        .iter()
        .filter(|(key, _)| !before.contains(key))
        .collect();

    let table_id = vm.new_table();
    let module_table = Value::table(table_id);
    for (key, value) in exported {
        let hash = vm.pool.string_hash(key);
        if let Some(table) = vm.pool.tables.get_mut(table_id.0) {
            table.entries.set(key, hash, value);
        }
    }

    // Cache roots the table for the VM's lifetime.
    vm.modules.insert(name, module_table);
    Ok(module_table)
}

// Native-library registration.
//
// Runtime-library functions are grouped into modules and installed into the
// globals table at VM startup. The `lib_module!` macro gives each module a
// compact declaration site.

use crate::lua_vm::{LuaVM, NativeFn};
use crate::stdlib;

/// A named group of native functions.
pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, NativeFn)>,
}

impl LibraryModule {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn with_function(mut self, name: &'static str, function: NativeFn) -> Self {
        self.entries.push((name, function));
        self
    }
}

/// Declare a library module:
///
/// ```ignore
/// lib_module!("_G", {
///     "print" => lua_print,
///     "type" => lua_type,
/// })
/// ```
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $item));
        )*
        module
    }};
}

/// Ordered collection of library modules.
pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    /// Install every entry of every module as a global native.
    pub fn load_all(&self, vm: &mut LuaVM) {
        for module in &self.modules {
            for &(name, function) in &module.entries {
                vm.define_native(name, function);
            }
        }
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The standard runtime library.
pub fn create_standard_registry() -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    registry.register(stdlib::basic::create_basic_lib());
    registry.register(stdlib::package::create_package_lib());
    registry
}

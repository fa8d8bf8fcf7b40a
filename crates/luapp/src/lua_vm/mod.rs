// The virtual machine.
//
// One LuaVM owns everything: the value stack, call frames, globals, the
// object pool, the collector, the cached "init" string, the open-upvalue
// list, the compiler pin list and the require cache. Allocation goes through
// the wrapper methods here, which give the collector a chance to run first -
// callers keep any transient object reachable from a root (usually by
// pushing it on the VM stack) across every allocation.

pub mod debug;
mod execute;
mod lua_error;
pub mod opcode;
mod options;

pub use lua_error::{InterpretResult, LuaError, LuaResult};
pub use opcode::OpCode;
pub use options::{DebugFlags, VmOptions};

use std::rc::Rc;

use ahash::AHashMap;

use crate::compiler;
use crate::gc::{
    ClosureId, FunctionId, GC, InstanceId, NativeId, ObjectPool, StringId, TableId, TraitId,
    UpvalueId, UpvalueState,
};
use crate::value::{Chunk, ObjRef, Table, Value};

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// Native function: receives the VM and the argument values, produces one
/// result. Natives report most failures by printing and returning nil;
/// `error`/`assert` surface a runtime error through the Err arm.
pub type NativeFn = fn(&mut LuaVM, &[Value]) -> LuaResult<Value>;

/// One function invocation. `base` is the stack slot of the callee, so slot 0
/// of the frame is the closure (or the receiver, for methods). The chunk Rc
/// is cloned out of the function object so the dispatch loop can fetch
/// without touching the pool.
pub struct CallFrame {
    pub closure: ClosureId,
    pub chunk: Rc<Chunk>,
    pub ip: usize,
    pub base: usize,
}

pub struct LuaVM {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) globals: Table,
    /// Open upvalues as (absolute stack slot, id), sorted by slot descending.
    /// At most one entry per slot.
    pub(crate) open_upvalues: Vec<(usize, UpvalueId)>,
    pub pool: ObjectPool,
    pub(crate) gc: GC,
    pub(crate) init_string: StringId,
    /// Values pinned while the compiler runs: constants and function objects
    /// not yet reachable from any heap object.
    pub(crate) compiler_roots: Vec<Value>,
    /// Cached results of `require`, keyed by module name.
    pub(crate) modules: AHashMap<String, Value>,
    pub options: VmOptions,
}

impl LuaVM {
    pub fn new(options: VmOptions) -> Box<LuaVM> {
        let mut pool = ObjectPool::new();
        let mut gc = GC::new();
        let init_string = pool.copy_string(&mut gc, "init");
        Box::new(LuaVM {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            pool,
            gc,
            init_string,
            compiler_roots: Vec::new(),
            modules: AHashMap::new(),
            options,
        })
    }

    /// Register the runtime library natives as globals.
    pub fn open_libs(&mut self) {
        crate::lib_registry::create_standard_registry().load_all(self);
    }

    // ============ Stack primitives ============

    #[inline]
    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    #[inline]
    pub(crate) fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    // ============ Garbage collection ============

    /// Run a collection if the byte balance crossed the threshold (or always,
    /// under stress). Called before every growing allocation.
    #[inline]
    pub(crate) fn check_gc(&mut self) {
        if self.options.stress_gc || self.gc.should_collect() {
            self.collect_garbage();
        }
    }

    pub fn collect_garbage(&mut self) {
        let before = self.gc.allocated;
        if self.options.debug.log_gc {
            println!("-- gc begin (allocated: {} bytes)", before);
        }

        self.mark_roots();
        self.gc.trace_references(&mut self.pool);
        let freed = self.gc.sweep(&mut self.pool);
        self.gc.finish_cycle();

        if self.options.debug.log_gc {
            println!(
                "-- gc end: collected {} bytes in {} objects (from {} to {}), next at {}",
                before.saturating_sub(self.gc.allocated),
                freed,
                before,
                self.gc.allocated,
                self.gc.threshold
            );
        }
    }

    fn mark_roots(&mut self) {
        for i in 0..self.stack.len() {
            let value = self.stack[i];
            self.gc.mark_value(&mut self.pool, value);
        }

        for i in 0..self.frames.len() {
            let closure = self.frames[i].closure;
            self.gc.mark_object(&mut self.pool, ObjRef::Closure(closure));
        }

        for i in 0..self.open_upvalues.len() {
            let (_, id) = self.open_upvalues[i];
            self.gc.mark_object(&mut self.pool, ObjRef::Upvalue(id));
        }

        // Globals: both keys and values.
        let global_pairs: Vec<(StringId, Value)> = self.globals.iter().collect();
        for (key, value) in global_pairs {
            self.gc.mark_object(&mut self.pool, ObjRef::String(key));
            self.gc.mark_value(&mut self.pool, value);
        }

        self.gc
            .mark_object(&mut self.pool, ObjRef::String(self.init_string));

        for i in 0..self.compiler_roots.len() {
            let value = self.compiler_roots[i];
            self.gc.mark_value(&mut self.pool, value);
        }

        let cached: Vec<Value> = self.modules.values().copied().collect();
        for value in cached {
            self.gc.mark_value(&mut self.pool, value);
        }
    }

    // ============ Allocation wrappers ============

    pub fn copy_string_value(&mut self, chars: &str) -> Value {
        self.check_gc();
        Value::string(self.pool.copy_string(&mut self.gc, chars))
    }

    pub fn take_string_value(&mut self, chars: String) -> Value {
        self.check_gc();
        Value::string(self.pool.take_string(&mut self.gc, chars))
    }

    pub fn intern(&mut self, chars: &str) -> StringId {
        self.check_gc();
        self.pool.copy_string(&mut self.gc, chars)
    }

    pub(crate) fn new_function(
        &mut self,
        arity: u8,
        upvalue_count: u8,
        chunk: Rc<Chunk>,
        name: Option<StringId>,
    ) -> FunctionId {
        self.check_gc();
        self.pool
            .alloc_function(&mut self.gc, arity, upvalue_count, chunk, name)
    }

    pub(crate) fn new_native(&mut self, function: NativeFn, name: StringId) -> NativeId {
        self.check_gc();
        self.pool.alloc_native(&mut self.gc, function, name)
    }

    pub(crate) fn new_closure(&mut self, function: FunctionId) -> ClosureId {
        self.check_gc();
        self.pool.alloc_closure(&mut self.gc, function)
    }

    pub(crate) fn new_upvalue(&mut self, state: UpvalueState) -> UpvalueId {
        self.check_gc();
        self.pool.alloc_upvalue(&mut self.gc, state)
    }

    pub(crate) fn new_class(&mut self, name: StringId) -> crate::gc::ClassId {
        self.check_gc();
        self.pool.alloc_class(&mut self.gc, name)
    }

    pub(crate) fn new_instance(&mut self, class: crate::gc::ClassId) -> InstanceId {
        self.check_gc();
        self.pool.alloc_instance(&mut self.gc, class)
    }

    pub(crate) fn new_bound_method(
        &mut self,
        receiver: Value,
        method: ClosureId,
    ) -> crate::gc::BoundMethodId {
        self.check_gc();
        self.pool.alloc_bound_method(&mut self.gc, receiver, method)
    }

    pub fn new_table(&mut self) -> TableId {
        self.check_gc();
        self.pool.alloc_table(&mut self.gc)
    }

    pub(crate) fn new_trait(&mut self, name: StringId) -> TraitId {
        self.check_gc();
        self.pool.alloc_trait(&mut self.gc, name)
    }

    // ============ Globals ============

    pub fn get_global(&mut self, name: &str) -> Option<Value> {
        let id = self.intern(name);
        let hash = self.pool.string_hash(id);
        self.globals.get(id, hash)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        // Root the value across the name interning.
        self.push(value);
        let id = self.intern(name);
        self.set_global_id(id, value);
        self.pop();
    }

    #[inline]
    pub(crate) fn set_global_id(&mut self, id: StringId, value: Value) -> bool {
        let hash = self.pool.string_hash(id);
        self.globals.set(id, hash, value)
    }

    /// Install one native, keeping name and object rooted across the two
    /// allocations.
    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_value = self.copy_string_value(name);
        self.push(name_value);
        let id = name_value.as_string_id().expect("interned name");
        let native = Value::native(self.new_native(function, id));
        self.push(native);
        self.set_global_id(id, native);
        self.pop();
        self.pop();
    }

    // ============ Entry points ============

    /// Compile source with this VM's pool. Diagnostics go to stderr.
    pub fn compile(&mut self, source: &str) -> LuaResult<FunctionId> {
        compiler::compile(self, source, None)
    }

    pub fn compile_with_name(&mut self, source: &str, filename: &str) -> LuaResult<FunctionId> {
        compiler::compile(self, source, Some(filename))
    }

    /// Wrap a compiled top-level function in a closure and run it to
    /// completion. Returns the script's final value (nil for programs).
    pub fn execute(&mut self, function: FunctionId) -> LuaResult<Value> {
        self.push(Value::function(function));
        let closure = self.new_closure(function);
        self.pop();
        self.push(Value::closure(closure));
        self.call_closure(closure, 0)?;
        self.run(0)
    }

    pub fn execute_string(&mut self, source: &str) -> LuaResult<Value> {
        let function = self.compile(source)?;
        self.execute(function)
    }

    /// Compile-and-run with the three-way result the CLI consumes.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        self.interpret_with_filename(source, None)
    }

    pub fn interpret_with_filename(
        &mut self,
        source: &str,
        filename: Option<&str>,
    ) -> InterpretResult {
        let function = match compiler::compile(self, source, filename) {
            Ok(f) => f,
            Err(_) => return InterpretResult::CompileError,
        };
        match self.execute(function) {
            Ok(_) => InterpretResult::Ok,
            Err(e) => InterpretResult::from(&e),
        }
    }

    /// Call a callable value from Rust with the given arguments, running
    /// nested frames to completion. The embedding entry point; `require`
    /// rides on the same mechanism.
    pub fn call_function(&mut self, callee: Value, args: &[Value]) -> LuaResult<Value> {
        let floor = self.frames.len();
        self.push(callee);
        for &arg in args {
            self.push(arg);
        }
        self.call_value(args.len() as u8)?;
        if self.frames.len() > floor {
            self.run(floor)
        } else {
            // A native already left its result on the stack.
            Ok(self.pop())
        }
    }

    // ============ Runtime errors ============

    /// Print the message and a stack trace innermost-first, reset the VM and
    /// build the error value. There is no unwinding visible to the language.
    pub(crate) fn runtime_error(&mut self, message: String) -> LuaError {
        eprintln!("{message}");

        for frame in self.frames.iter().rev() {
            let instruction = frame.ip.saturating_sub(1);
            let line = frame.chunk.line_at(instruction);
            let name = self
                .pool
                .closures
                .get(frame.closure.0)
                .and_then(|c| self.pool.functions.get(c.function.0))
                .and_then(|f| f.name)
                .map(|n| format!("{}()", self.pool.string(n)));
            match name {
                Some(name) => eprintln!("[line {line}] in {name}"),
                None => eprintln!("[line {line}] in script"),
            }
        }

        self.reset_stack();
        LuaError::Runtime(message)
    }
}

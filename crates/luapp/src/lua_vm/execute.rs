// The fetch/decode/execute loop and the call machinery.
//
// The loop caches the current frame's chunk, instruction pointer and base in
// locals and writes the ip back to the frame before anything that can push or
// pop frames, call a native, or raise - the stack trace and the resumed
// dispatch both read it from there. Transient objects built by an opcode stay
// on the VM stack across allocations so a collection triggered mid-opcode
// sees them as roots.

use std::rc::Rc;

use crate::gc::{ClassId, ClosureId, StringId, TableId, UpvalueId, UpvalueState};
use crate::lua_vm::{CallFrame, FRAMES_MAX, LuaResult, LuaVM, OpCode, debug};
use crate::value::{Chunk, Value};

impl LuaVM {
    fn frame_view(&self) -> (Rc<Chunk>, usize, usize) {
        let frame = self.frames.last().expect("active frame");
        (frame.chunk.clone(), frame.ip, frame.base)
    }

    #[inline]
    fn sync_ip(&mut self, ip: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.ip = ip;
        }
    }

    /// Pop two numeric operands, or raise with the line at `ip`.
    #[inline]
    fn numeric_operands(&mut self, ip: usize) -> LuaResult<(f64, f64)> {
        let b = self.peek(0);
        let a = self.peek(1);
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.pop();
                self.pop();
                Ok((x, y))
            }
            _ => {
                self.sync_ip(ip);
                Err(self.runtime_error("Operands must be numbers.".to_string()))
            }
        }
    }

    /// Execute until the frame stack drops back to `frame_floor`. Returns the
    /// value produced by the frame that brought it there.
    pub(crate) fn run(&mut self, frame_floor: usize) -> LuaResult<Value> {
        let (mut chunk, mut ip, mut base) = self.frame_view();

        macro_rules! read_byte {
            () => {{
                let b = chunk.code[ip];
                ip += 1;
                b
            }};
        }
        macro_rules! read_u16 {
            () => {{
                let hi = chunk.code[ip] as usize;
                let lo = chunk.code[ip + 1] as usize;
                ip += 2;
                (hi << 8) | lo
            }};
        }
        macro_rules! read_constant {
            () => {{
                let index = read_byte!() as usize;
                chunk.constants.get(index).unwrap_or(Value::Nil)
            }};
        }
        macro_rules! read_string {
            () => {
                read_constant!()
                    .as_string_id()
                    .expect("string constant operand")
            };
        }
        macro_rules! reload_frame {
            () => {{
                let view = self.frame_view();
                chunk = view.0;
                ip = view.1;
                base = view.2;
            }};
        }
        macro_rules! throw {
            ($($arg:tt)*) => {{
                self.sync_ip(ip);
                return Err(self.runtime_error(format!($($arg)*)));
            }};
        }

        loop {
            if self.options.debug.trace_execution {
                print!("          ");
                for value in &self.stack {
                    print!("[ {} ]", self.pool.display_value(*value));
                }
                println!();
                debug::disassemble_instruction(&self.pool, &chunk, ip);
            }

            let op = OpCode::from_byte(read_byte!()).expect("valid opcode");
            match op {
                // ============ Constants & literals ============
                OpCode::Constant => {
                    let value = read_constant!();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),

                // ============ Stack ============
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::PopN => {
                    let n = read_byte!() as usize;
                    let len = self.stack.len();
                    self.stack.truncate(len - n);
                }

                // ============ Variables ============
                OpCode::GetLocal => {
                    let slot = read_byte!() as usize;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = read_byte!() as usize;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = read_string!();
                    let hash = self.pool.string_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => throw!("Undefined variable '{}'.", self.pool.string(name)),
                    }
                }
                OpCode::DefineGlobal => {
                    let name = read_string!();
                    let value = self.peek(0);
                    self.set_global_id(name, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = read_string!();
                    let value = self.peek(0);
                    if self.set_global_id(name, value) {
                        // The key was new: roll back and report.
                        let hash = self.pool.string_hash(name);
                        self.globals.delete(name, hash);
                        throw!("Undefined variable '{}'.", self.pool.string(name));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = read_byte!() as usize;
                    let upvalue = self.current_upvalue(slot);
                    let value = match self.upvalue_state(upvalue) {
                        UpvalueState::Open(index) => self.stack[index],
                        UpvalueState::Closed(value) => value,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = read_byte!() as usize;
                    let upvalue = self.current_upvalue(slot);
                    let value = self.peek(0);
                    match self.upvalue_state(upvalue) {
                        UpvalueState::Open(index) => self.stack[index] = value,
                        UpvalueState::Closed(_) => {
                            if let Some(up) = self.pool.upvalues.get_mut(upvalue.0) {
                                up.state = UpvalueState::Closed(value);
                            }
                        }
                    }
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }

                // ============ Arithmetic & logic ============
                OpCode::Add => {
                    let (a, b) = self.numeric_operands(ip)?;
                    self.push(Value::Number(a + b));
                }
                OpCode::Subtract => {
                    let (a, b) = self.numeric_operands(ip)?;
                    self.push(Value::Number(a - b));
                }
                OpCode::Multiply => {
                    let (a, b) = self.numeric_operands(ip)?;
                    self.push(Value::Number(a * b));
                }
                OpCode::Divide => {
                    // IEEE semantics: x/0 is +-inf or NaN.
                    let (a, b) = self.numeric_operands(ip)?;
                    self.push(Value::Number(a / b));
                }
                OpCode::Modulo => {
                    let (a, b) = self.numeric_operands(ip)?;
                    let divisor = b as i64;
                    if divisor == 0 {
                        throw!("Modulo by zero.");
                    }
                    self.push(Value::Number((a as i64 % divisor) as f64));
                }
                OpCode::Negate => {
                    match self.peek(0).as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        None => throw!("Operand must be a number."),
                    }
                }
                OpCode::Concat => {
                    let a = self.peek(1).as_string_id();
                    let b = self.peek(0).as_string_id();
                    let (Some(a), Some(b)) = (a, b) else {
                        throw!("Operands must be strings.");
                    };
                    let mut joined = self.pool.string(a).to_string();
                    joined.push_str(self.pool.string(b));
                    // Operands stay on the stack across the allocation.
                    let value = self.take_string_value(joined);
                    self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::Length => {
                    let value = self.pop();
                    if let Some(id) = value.as_string_id() {
                        self.push(Value::Number(self.pool.string(id).len() as f64));
                    } else if let Some(id) = value.as_table_id() {
                        let count = self
                            .pool
                            .tables
                            .get(id.0)
                            .map(|t| t.array.len())
                            .unwrap_or(0);
                        self.push(Value::Number(count as f64));
                    } else {
                        throw!("Can only get length of string or table.");
                    }
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => {
                    let (a, b) = self.numeric_operands(ip)?;
                    self.push(Value::Bool(a > b));
                }
                OpCode::Less => {
                    let (a, b) = self.numeric_operands(ip)?;
                    self.push(Value::Bool(a < b));
                }

                // ============ Control flow ============
                OpCode::Jump => {
                    let offset = read_u16!();
                    ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = read_u16!();
                    if self.peek(0).is_falsey() {
                        ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = read_u16!();
                    ip -= offset;
                }

                // ============ Calls & closures ============
                OpCode::Call => {
                    let arg_count = read_byte!();
                    self.sync_ip(ip);
                    self.call_value(arg_count)?;
                    reload_frame!();
                }
                OpCode::Invoke => {
                    let name = read_string!();
                    let arg_count = read_byte!();
                    self.sync_ip(ip);
                    self.invoke(name, arg_count)?;
                    reload_frame!();
                }
                OpCode::SuperInvoke => {
                    let name = read_string!();
                    let arg_count = read_byte!();
                    let superclass = self.pop();
                    self.sync_ip(ip);
                    let Some(class) = superclass.as_class_id() else {
                        return Err(self.runtime_error("Superclass must be a class.".to_string()));
                    };
                    self.invoke_from_class(class, name, arg_count)?;
                    reload_frame!();
                }
                OpCode::Closure => {
                    let function = read_constant!()
                        .as_function_id()
                        .expect("function constant operand");
                    let upvalue_count = self
                        .pool
                        .functions
                        .get(function.0)
                        .map(|f| f.upvalue_count as usize)
                        .unwrap_or(0);
                    let closure = self.new_closure(function);
                    self.push(Value::closure(closure));
                    for _ in 0..upvalue_count {
                        let is_local = read_byte!() != 0;
                        let index = read_byte!() as usize;
                        let upvalue = if is_local {
                            self.capture_upvalue(base + index)
                        } else {
                            let current = self.frames.last().expect("active frame").closure;
                            self.pool
                                .closures
                                .get(current.0)
                                .expect("live closure")
                                .upvalues[index]
                        };
                        self.pool
                            .closures
                            .get_mut(closure.0)
                            .expect("live closure")
                            .upvalues
                            .push(upvalue);
                    }
                }
                OpCode::Return => {
                    let result = self.pop();
                    self.close_upvalues(base);
                    self.frames.pop();
                    self.stack.truncate(base);
                    if self.frames.len() == frame_floor {
                        return Ok(result);
                    }
                    self.push(result);
                    reload_frame!();
                }

                // ============ Classes, instances, traits ============
                OpCode::Class => {
                    let name = read_string!();
                    let class = self.new_class(name);
                    self.push(Value::class(class));
                }
                OpCode::Inherit => {
                    let Some(superclass) = self.peek(1).as_class_id() else {
                        throw!("Superclass must be a class.");
                    };
                    let Some(subclass) = self.peek(0).as_class_id() else {
                        throw!("Can only inherit into a class.");
                    };
                    // Shallow inheritance: copy the parent's methods down now;
                    // later METHOD ops override.
                    let methods: Vec<(StringId, u32, Value)> = self
                        .pool
                        .classes
                        .get(superclass.0)
                        .map(|c| c.methods.entries().collect())
                        .unwrap_or_default();
                    if let Some(sub) = self.pool.classes.get_mut(subclass.0) {
                        for (key, hash, value) in methods {
                            sub.methods.set(key, hash, value);
                        }
                        sub.superclass = Some(superclass);
                    }
                    self.pop(); // subclass; the superclass stays as `super`
                }
                OpCode::Method => {
                    let name = read_string!();
                    let is_private = read_byte!() != 0;
                    self.define_method(name, is_private);
                }
                OpCode::GetProperty => {
                    let name = read_string!();
                    let Some(instance) = self.peek(0).as_instance_id() else {
                        throw!("Only instances have properties.");
                    };
                    let hash = self.pool.string_hash(name);
                    let field = self
                        .pool
                        .instances
                        .get(instance.0)
                        .and_then(|i| i.fields.get(name, hash));
                    if let Some(value) = field {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = self
                            .pool
                            .instances
                            .get(instance.0)
                            .expect("live instance")
                            .class;
                        self.sync_ip(ip);
                        self.bind_method(class, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let name = read_string!();
                    let Some(instance) = self.peek(1).as_instance_id() else {
                        throw!("Only instances have fields.");
                    };
                    let hash = self.pool.string_hash(name);
                    let value = self.peek(0);
                    if let Some(obj) = self.pool.instances.get_mut(instance.0) {
                        obj.fields.set(name, hash, value);
                    }
                    let value = self.pop();
                    self.pop(); // instance
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = read_string!();
                    let superclass = self.pop();
                    self.sync_ip(ip);
                    let Some(class) = superclass.as_class_id() else {
                        return Err(self.runtime_error("Superclass must be a class.".to_string()));
                    };
                    self.bind_method(class, name)?;
                }
                OpCode::New => {
                    let arg_count = read_byte!();
                    let argc = arg_count as usize;
                    let Some(class) = self.peek(argc).as_class_id() else {
                        throw!("Can only instantiate classes.");
                    };
                    // The class is still on the stack while the instance is
                    // allocated, then gets overwritten by it.
                    let instance = self.new_instance(class);
                    let slot = self.stack.len() - argc - 1;
                    self.stack[slot] = Value::instance(instance);

                    let init_hash = self.pool.string_hash(self.init_string);
                    let initializer = self
                        .pool
                        .classes
                        .get(class.0)
                        .and_then(|c| c.methods.get(self.init_string, init_hash));
                    self.sync_ip(ip);
                    match initializer {
                        Some(init) => {
                            let Some(closure) = init.as_closure_id() else {
                                return Err(
                                    self.runtime_error("'init' must be a method.".to_string())
                                );
                            };
                            self.call_closure(closure, arg_count)?;
                            reload_frame!();
                        }
                        None if arg_count != 0 => {
                            throw!("Expected 0 arguments but got {}.", arg_count);
                        }
                        None => {}
                    }
                }
                OpCode::Trait => {
                    let name = read_string!();
                    let lua_trait = self.new_trait(name);
                    self.push(Value::lua_trait(lua_trait));
                }
                OpCode::Implement => {
                    let class_value = self.pop();
                    let trait_value = self.pop();
                    let Some(trait_id) = trait_value.as_trait_id() else {
                        throw!("Can only implement traits.");
                    };
                    let Some(class_id) = class_value.as_class_id() else {
                        throw!("Only classes can implement traits.");
                    };
                    let methods: Vec<(StringId, u32, Value)> = self
                        .pool
                        .traits
                        .get(trait_id.0)
                        .map(|t| t.methods.entries().collect())
                        .unwrap_or_default();
                    if let Some(class) = self.pool.classes.get_mut(class_id.0) {
                        for (key, hash, value) in methods {
                            class.methods.set(key, hash, value);
                        }
                    }
                }

                // ============ Tables ============
                OpCode::Table => {
                    let table = self.new_table();
                    self.push(Value::table(table));
                }
                OpCode::TableGet => {
                    let key = self.pop();
                    let table = self.pop();
                    let Some(id) = table.as_table_id() else {
                        throw!("Can only index tables.");
                    };
                    let value = self.table_index(id, key).unwrap_or(Value::Nil);
                    self.push(value);
                }
                OpCode::TableSet => {
                    let value = self.pop();
                    let key = self.pop();
                    let table = self.pop();
                    let Some(id) = table.as_table_id() else {
                        throw!("Can only index tables.");
                    };
                    if let Err(message) = self.table_store(id, key, value) {
                        throw!("{}", message);
                    }
                    self.push(value);
                }
                OpCode::TableSetEntry => {
                    // Literal [key] = value: the table stays underneath.
                    let value = self.pop();
                    let key = self.pop();
                    let Some(id) = self.peek(0).as_table_id() else {
                        throw!("Expected table.");
                    };
                    if let Err(message) = self.table_store(id, key, value) {
                        throw!("{}", message);
                    }
                }
                OpCode::TableAdd => {
                    let value = self.pop();
                    let Some(id) = self.peek(0).as_table_id() else {
                        throw!("Expected table.");
                    };
                    if let Some(table) = self.pool.tables.get_mut(id.0) {
                        table.array.write(value);
                    }
                }
                OpCode::TableSetField => {
                    let name = read_string!();
                    let value = self.pop();
                    let Some(id) = self.peek(0).as_table_id() else {
                        throw!("Expected table.");
                    };
                    let hash = self.pool.string_hash(name);
                    if let Some(table) = self.pool.tables.get_mut(id.0) {
                        table.entries.set(name, hash, value);
                    }
                }
            }
        }
    }

    // ============ Table access ============

    /// Read `table[key]`: array part for integer keys from 1, hash part for
    /// strings. Missing keys are None (the opcode pushes nil, not an error).
    pub(crate) fn table_index(&self, table: TableId, key: Value) -> Option<Value> {
        let obj = self.pool.tables.get(table.0)?;
        match key {
            Value::Number(n) => {
                let index = n as i64;
                if index >= 1 && (index as usize) <= obj.array.len() {
                    obj.array.get(index as usize - 1)
                } else {
                    None
                }
            }
            _ => {
                let id = key.as_string_id()?;
                obj.entries.get(id, self.pool.string_hash(id))
            }
        }
    }

    /// Write `table[key] = value`. Positive integer keys grow the array part
    /// with nil padding; string keys go to the hash part; anything else is
    /// rejected.
    pub(crate) fn table_store(
        &mut self,
        table: TableId,
        key: Value,
        value: Value,
    ) -> Result<(), String> {
        if let Value::Number(n) = key {
            let index = n as i64;
            if index >= 1 {
                if let Some(obj) = self.pool.tables.get_mut(table.0) {
                    while obj.array.len() < index as usize {
                        obj.array.write(Value::Nil);
                    }
                    obj.array.set(index as usize - 1, value);
                }
                return Ok(());
            }
            return Err("Table key must be a string or positive integer.".to_string());
        }
        if let Some(id) = key.as_string_id() {
            let hash = self.pool.string_hash(id);
            if let Some(obj) = self.pool.tables.get_mut(table.0) {
                obj.entries.set(id, hash, value);
            }
            return Ok(());
        }
        Err("Table key must be a string or positive integer.".to_string())
    }

    // ============ Call protocol ============

    /// Call the value sitting `arg_count` slots below the top. Closures push
    /// a frame; natives run inline and replace callee-plus-args with their
    /// result; bound methods install the receiver in slot 0 first.
    pub(crate) fn call_value(&mut self, arg_count: u8) -> LuaResult<()> {
        let argc = arg_count as usize;
        let callee = self.peek(argc);

        if let Some(closure) = callee.as_closure_id() {
            return self.call_closure(closure, arg_count);
        }
        if let Value::Obj(crate::value::ObjRef::Native(id)) = callee {
            let function = self
                .pool
                .natives
                .get(id.0)
                .expect("live native")
                .function;
            let start = self.stack.len() - argc;
            // Args are copied for the native but also stay on the stack, so
            // they remain rooted while it allocates.
            let args: Vec<Value> = self.stack[start..].to_vec();
            let result = function(self, &args)?;
            self.stack.truncate(start - 1);
            self.push(result);
            return Ok(());
        }
        if let Value::Obj(crate::value::ObjRef::BoundMethod(id)) = callee {
            let bound = self.pool.bound_methods.get(id.0).expect("live bound method");
            let receiver = bound.receiver;
            let method = bound.method;
            let slot = self.stack.len() - argc - 1;
            self.stack[slot] = receiver;
            return self.call_closure(method, arg_count);
        }

        Err(self.runtime_error("Can only call functions and classes.".to_string()))
    }

    /// Arity check, frame-depth check, then push the new frame. Slot 0 of the
    /// frame is the callee (or receiver).
    pub(crate) fn call_closure(&mut self, closure: ClosureId, arg_count: u8) -> LuaResult<()> {
        let function = self
            .pool
            .closures
            .get(closure.0)
            .expect("live closure")
            .function;
        let (arity, chunk) = {
            let f = self.pool.functions.get(function.0).expect("live function");
            (f.arity, f.chunk.clone())
        };

        if arg_count != arity {
            return Err(self.runtime_error(format!(
                "Expected {} arguments but got {}.",
                arity, arg_count
            )));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow.".to_string()));
        }

        let base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame {
            closure,
            chunk,
            ip: 0,
            base,
        });
        Ok(())
    }

    /// `obj:name(args)` without materializing a bound method. Fields shadow
    /// methods: a function stored in a field is called instead.
    fn invoke(&mut self, name: StringId, arg_count: u8) -> LuaResult<()> {
        let argc = arg_count as usize;
        let receiver = self.peek(argc);

        let Some(instance) = receiver.as_instance_id() else {
            return Err(self.runtime_error("Only instances have methods.".to_string()));
        };

        let hash = self.pool.string_hash(name);
        let field = self
            .pool
            .instances
            .get(instance.0)
            .and_then(|i| i.fields.get(name, hash));
        if let Some(value) = field {
            let slot = self.stack.len() - argc - 1;
            self.stack[slot] = value;
            return self.call_value(arg_count);
        }

        let class = self
            .pool
            .instances
            .get(instance.0)
            .expect("live instance")
            .class;
        self.invoke_from_class(class, name, arg_count)
    }

    pub(crate) fn invoke_from_class(
        &mut self,
        class: ClassId,
        name: StringId,
        arg_count: u8,
    ) -> LuaResult<()> {
        let hash = self.pool.string_hash(name);
        let method = self
            .pool
            .classes
            .get(class.0)
            .and_then(|c| c.methods.get(name, hash));
        let Some(method) = method else {
            let name = self.pool.string(name).to_string();
            return Err(self.runtime_error(format!("Undefined method '{}'.", name)));
        };
        let Some(closure) = method.as_closure_id() else {
            return Err(self.runtime_error("Can only call functions and classes.".to_string()));
        };
        self.call_closure(closure, arg_count)
    }

    /// Resolve a method and leave it bound to the receiver on top of the
    /// stack.
    fn bind_method(&mut self, class: ClassId, name: StringId) -> LuaResult<()> {
        let hash = self.pool.string_hash(name);
        let method = self
            .pool
            .classes
            .get(class.0)
            .and_then(|c| c.methods.get(name, hash));
        let Some(method) = method else {
            let name = self.pool.string(name).to_string();
            return Err(self.runtime_error(format!("Undefined property '{}'.", name)));
        };
        let Some(closure) = method.as_closure_id() else {
            return Err(self.runtime_error("Can only call functions and classes.".to_string()));
        };

        // Receiver stays rooted on the stack while the bound method is made.
        let receiver = self.peek(0);
        let bound = self.new_bound_method(receiver, closure);
        self.pop();
        self.push(Value::bound_method(bound));
        Ok(())
    }

    /// METHOD: pop the closure on top into the class or trait underneath.
    fn define_method(&mut self, name: StringId, is_private: bool) {
        let method = self.peek(0);
        let target = self.peek(1);
        let hash = self.pool.string_hash(name);

        if let Some(class) = target.as_class_id() {
            if let Some(obj) = self.pool.classes.get_mut(class.0) {
                obj.methods.set(name, hash, method);
                if is_private {
                    obj.privates.set(name, hash, Value::Bool(true));
                }
            }
        } else if let Some(trait_id) = target.as_trait_id() {
            if let Some(obj) = self.pool.traits.get_mut(trait_id.0) {
                obj.methods.set(name, hash, method);
            }
        }
        self.pop();
    }

    // ============ Upvalues ============

    fn current_upvalue(&self, slot: usize) -> UpvalueId {
        let closure = self.frames.last().expect("active frame").closure;
        self.pool
            .closures
            .get(closure.0)
            .expect("live closure")
            .upvalues[slot]
    }

    fn upvalue_state(&self, id: UpvalueId) -> UpvalueState {
        self.pool
            .upvalues
            .get(id.0)
            .map(|u| u.state)
            .unwrap_or(UpvalueState::Closed(Value::Nil))
    }

    /// Find or create the open upvalue for an absolute stack slot. The list
    /// is kept sorted by slot descending with at most one entry per slot, so
    /// closures capturing the same variable share one upvalue.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> UpvalueId {
        let mut index = 0;
        while index < self.open_upvalues.len() && self.open_upvalues[index].0 > slot {
            index += 1;
        }
        if index < self.open_upvalues.len() && self.open_upvalues[index].0 == slot {
            return self.open_upvalues[index].1;
        }

        let id = self.new_upvalue(UpvalueState::Open(slot));
        self.open_upvalues.insert(index, (slot, id));
        id
    }

    /// Close every open upvalue at or above `from`: copy the stack slot into
    /// the upvalue and unlink it. The one place a variable moves from stack
    /// to heap.
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        while let Some(&(slot, id)) = self.open_upvalues.first() {
            if slot < from {
                break;
            }
            let value = self.stack[slot];
            if let Some(upvalue) = self.pool.upvalues.get_mut(id.0) {
                upvalue.state = UpvalueState::Closed(value);
            }
            self.open_upvalues.remove(0);
        }
    }
}

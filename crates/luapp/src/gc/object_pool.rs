// Object pool: typed arenas owning every heap object.
//
// Values hold 4-byte ids instead of pointers; all access goes through the
// pool. Each arena is a Vec of Option slots with a free list, so allocation
// after the initial warm-up is O(1) and ids stay stable for the object's
// lifetime. The sweep walks the arenas directly - the arena storage *is* the
// all-objects list.

use std::mem;
use std::rc::Rc;

use crate::gc::GC;
use crate::lua_vm::NativeFn;
use crate::value::{Chunk, Table, Value, ValueArray, hash_bytes};

// ============ Object ids ============

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(pub u32);
    };
}

define_id!(StringId);
define_id!(FunctionId);
define_id!(NativeId);
define_id!(ClosureId);
define_id!(UpvalueId);
define_id!(ClassId);
define_id!(InstanceId);
define_id!(BoundMethodId);
define_id!(TableId);
define_id!(TraitId);

// ============ GC header ============

/// Embedded in every heap object: the mark bit and the byte size charged to
/// the collector's running balance when the object was allocated.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcHeader {
    pub marked: bool,
    pub size: u32,
}

impl GcHeader {
    #[inline]
    pub fn with_size(size: usize) -> Self {
        GcHeader {
            marked: false,
            size: size as u32,
        }
    }
}

// ============ Heap objects ============

/// Interned immutable string with its cached FNV-1a hash.
pub struct GcString {
    pub header: GcHeader,
    pub chars: Box<str>,
    pub hash: u32,
}

/// Compiled function: bytecode plus metadata. Never executed directly; the
/// CLOSURE opcode wraps it at runtime. The chunk sits behind an Rc so call
/// frames can hold it without going back through the pool on every fetch.
pub struct GcFunction {
    pub header: GcHeader,
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Rc<Chunk>,
    pub name: Option<StringId>, // None for top-level scripts
}

/// Built-in function implemented in Rust.
pub struct GcNative {
    pub header: GcHeader,
    pub function: NativeFn,
    pub name: StringId,
}

/// Function plus captured upvalues.
pub struct GcClosure {
    pub header: GcHeader,
    pub function: FunctionId,
    pub upvalues: Vec<UpvalueId>,
}

/// Open: the variable still lives in a stack slot (absolute index).
/// Closed: the value has been copied inline because the slot is gone.
#[derive(Debug, Clone, Copy)]
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

pub struct GcUpvalue {
    pub header: GcHeader,
    pub state: UpvalueState,
}

impl GcUpvalue {
    #[inline]
    pub fn open_slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }
}

/// Class definition. `privates` flags names declared with `private`.
pub struct GcClass {
    pub header: GcHeader,
    pub name: StringId,
    pub superclass: Option<ClassId>,
    pub methods: Table,
    pub privates: Table,
}

pub struct GcInstance {
    pub header: GcHeader,
    pub class: ClassId,
    pub fields: Table,
}

/// A method paired with its receiver, made by property access and consumed by
/// the next call.
pub struct GcBoundMethod {
    pub header: GcHeader,
    pub receiver: Value,
    pub method: ClosureId,
}

/// Language table: hash part for string keys, dense array part for integer
/// keys 1..n.
pub struct GcTable {
    pub header: GcHeader,
    pub entries: Table,
    pub array: ValueArray,
}

/// Named bundle of methods merged into classes at `implements` time.
pub struct GcTrait {
    pub header: GcHeader,
    pub name: StringId,
    pub methods: Table,
}

// ============ Arena ============

/// Typed slot arena with a free list. `None` slots are reusable.
pub struct Arena<T> {
    storage: Vec<Option<T>>,
    free_list: Vec<u32>,
    count: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            storage: Vec::new(),
            free_list: Vec::new(),
            count: 0,
        }
    }

    /// Store an object and return its slot id.
    pub fn alloc(&mut self, value: T) -> u32 {
        self.count += 1;
        if let Some(free) = self.free_list.pop() {
            self.storage[free as usize] = Some(value);
            free
        } else {
            let id = self.storage.len() as u32;
            self.storage.push(Some(value));
            id
        }
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&T> {
        self.storage.get(id as usize).and_then(|slot| slot.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.storage
            .get_mut(id as usize)
            .and_then(|slot| slot.as_mut())
    }

    /// Release a slot for reuse. Returns the object if it was live.
    pub fn free(&mut self, id: u32) -> Option<T> {
        let slot = self.storage.get_mut(id as usize)?;
        let value = slot.take()?;
        self.free_list.push(id);
        self.count -= 1;
        Some(value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.storage
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i as u32, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.storage
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|v| (i as u32, v)))
    }

    /// Ids of live slots, collected up front so callers can free while
    /// walking.
    pub fn live_ids(&self) -> Vec<u32> {
        self.iter().map(|(id, _)| id).collect()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Object pool ============

/// Owns every heap object through its typed arenas, plus the weak string
/// intern table (a string-keyed table with nil values; entries drop when the
/// key string dies).
pub struct ObjectPool {
    pub strings: Arena<GcString>,
    pub functions: Arena<GcFunction>,
    pub natives: Arena<GcNative>,
    pub closures: Arena<GcClosure>,
    pub upvalues: Arena<GcUpvalue>,
    pub classes: Arena<GcClass>,
    pub instances: Arena<GcInstance>,
    pub bound_methods: Arena<GcBoundMethod>,
    pub tables: Arena<GcTable>,
    pub traits: Arena<GcTrait>,
    pub(crate) intern: Table,
}

impl ObjectPool {
    pub fn new() -> Self {
        ObjectPool {
            strings: Arena::new(),
            functions: Arena::new(),
            natives: Arena::new(),
            closures: Arena::new(),
            upvalues: Arena::new(),
            classes: Arena::new(),
            instances: Arena::new(),
            bound_methods: Arena::new(),
            tables: Arena::new(),
            traits: Arena::new(),
            intern: Table::new(),
        }
    }

    // ============ Strings ============

    fn alloc_string(&mut self, gc: &mut GC, chars: Box<str>, hash: u32) -> StringId {
        let size = mem::size_of::<GcString>() + chars.len();
        gc.account_alloc(size);
        let id = StringId(self.strings.alloc(GcString {
            header: GcHeader::with_size(size),
            chars,
            hash,
        }));
        self.intern.set(id, hash, Value::Nil);
        id
    }

    /// Intern a borrowed byte range. Returns the existing object on content
    /// match, so identity equality is content equality.
    pub fn copy_string(&mut self, gc: &mut GC, chars: &str) -> StringId {
        let hash = hash_bytes(chars.as_bytes());
        if let Some(existing) = self.intern.find_string(&self.strings, chars, hash) {
            return existing;
        }
        self.alloc_string(gc, chars.into(), hash)
    }

    /// Intern an owned buffer, dropping it on an intern hit.
    pub fn take_string(&mut self, gc: &mut GC, chars: String) -> StringId {
        let hash = hash_bytes(chars.as_bytes());
        if let Some(existing) = self.intern.find_string(&self.strings, &chars, hash) {
            return existing;
        }
        self.alloc_string(gc, chars.into_boxed_str(), hash)
    }

    #[inline]
    pub fn string(&self, id: StringId) -> &str {
        self.strings
            .get(id.0)
            .map(|s| &*s.chars)
            .unwrap_or_default()
    }

    #[inline]
    pub fn string_hash(&self, id: StringId) -> u32 {
        self.strings.get(id.0).map(|s| s.hash).unwrap_or(0)
    }

    // ============ Other objects ============

    pub fn alloc_function(
        &mut self,
        gc: &mut GC,
        arity: u8,
        upvalue_count: u8,
        chunk: Rc<Chunk>,
        name: Option<StringId>,
    ) -> FunctionId {
        let size = mem::size_of::<GcFunction>() + chunk.len();
        gc.account_alloc(size);
        FunctionId(self.functions.alloc(GcFunction {
            header: GcHeader::with_size(size),
            arity,
            upvalue_count,
            chunk,
            name,
        }))
    }

    pub fn alloc_native(&mut self, gc: &mut GC, function: NativeFn, name: StringId) -> NativeId {
        let size = mem::size_of::<GcNative>();
        gc.account_alloc(size);
        NativeId(self.natives.alloc(GcNative {
            header: GcHeader::with_size(size),
            function,
            name,
        }))
    }

    pub fn alloc_closure(&mut self, gc: &mut GC, function: FunctionId) -> ClosureId {
        let upvalue_count = self
            .functions
            .get(function.0)
            .map(|f| f.upvalue_count as usize)
            .unwrap_or(0);
        let size = mem::size_of::<GcClosure>() + upvalue_count * mem::size_of::<UpvalueId>();
        gc.account_alloc(size);
        ClosureId(self.closures.alloc(GcClosure {
            header: GcHeader::with_size(size),
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        }))
    }

    pub fn alloc_upvalue(&mut self, gc: &mut GC, state: UpvalueState) -> UpvalueId {
        let size = mem::size_of::<GcUpvalue>();
        gc.account_alloc(size);
        UpvalueId(self.upvalues.alloc(GcUpvalue {
            header: GcHeader::with_size(size),
            state,
        }))
    }

    pub fn alloc_class(&mut self, gc: &mut GC, name: StringId) -> ClassId {
        let size = mem::size_of::<GcClass>();
        gc.account_alloc(size);
        ClassId(self.classes.alloc(GcClass {
            header: GcHeader::with_size(size),
            name,
            superclass: None,
            methods: Table::new(),
            privates: Table::new(),
        }))
    }

    pub fn alloc_instance(&mut self, gc: &mut GC, class: ClassId) -> InstanceId {
        let size = mem::size_of::<GcInstance>();
        gc.account_alloc(size);
        InstanceId(self.instances.alloc(GcInstance {
            header: GcHeader::with_size(size),
            class,
            fields: Table::new(),
        }))
    }

    pub fn alloc_bound_method(
        &mut self,
        gc: &mut GC,
        receiver: Value,
        method: ClosureId,
    ) -> BoundMethodId {
        let size = mem::size_of::<GcBoundMethod>();
        gc.account_alloc(size);
        BoundMethodId(self.bound_methods.alloc(GcBoundMethod {
            header: GcHeader::with_size(size),
            receiver,
            method,
        }))
    }

    pub fn alloc_table(&mut self, gc: &mut GC) -> TableId {
        let size = mem::size_of::<GcTable>();
        gc.account_alloc(size);
        TableId(self.tables.alloc(GcTable {
            header: GcHeader::with_size(size),
            entries: Table::new(),
            array: ValueArray::new(),
        }))
    }

    pub fn alloc_trait(&mut self, gc: &mut GC, name: StringId) -> TraitId {
        let size = mem::size_of::<GcTrait>();
        gc.account_alloc(size);
        TraitId(self.traits.alloc(GcTrait {
            header: GcHeader::with_size(size),
            name,
            methods: Table::new(),
        }))
    }

    // ============ Display ============

    /// Human-readable rendering used by `print`, `tostring` and the
    /// disassembler.
    pub fn display_value(&self, value: Value) -> String {
        use crate::value::ObjRef;
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => if b { "true" } else { "false" }.to_string(),
            Value::Number(n) => crate::value::number_to_string(n),
            Value::Obj(r) => match r {
                ObjRef::String(id) => self.string(id).to_string(),
                ObjRef::Function(id) => self.display_function(id),
                ObjRef::Native(_) => "<native fn>".to_string(),
                ObjRef::Closure(id) => {
                    let function = self.closures.get(id.0).map(|c| c.function);
                    match function {
                        Some(f) => self.display_function(f),
                        None => "<fn>".to_string(),
                    }
                }
                ObjRef::Upvalue(_) => "upvalue".to_string(),
                ObjRef::Class(id) => match self.classes.get(id.0) {
                    Some(c) => format!("<class {}>", self.string(c.name)),
                    None => "<class>".to_string(),
                },
                ObjRef::Instance(id) => match self.instances.get(id.0) {
                    Some(i) => {
                        let name = self
                            .classes
                            .get(i.class.0)
                            .map(|c| self.string(c.name))
                            .unwrap_or("?");
                        format!("<instance {}>", name)
                    }
                    None => "<instance>".to_string(),
                },
                ObjRef::BoundMethod(id) => {
                    let function = self
                        .bound_methods
                        .get(id.0)
                        .and_then(|b| self.closures.get(b.method.0))
                        .map(|c| c.function);
                    match function {
                        Some(f) => self.display_function(f),
                        None => "<fn>".to_string(),
                    }
                }
                ObjRef::Table(id) => match self.tables.get(id.0) {
                    Some(t) => {
                        let mut out = String::from("{");
                        let mut first = true;
                        for v in t.array.iter() {
                            if !first {
                                out.push_str(", ");
                            }
                            first = false;
                            out.push_str(&self.display_value(v));
                        }
                        let hash_count = t.entries.live_count();
                        if hash_count > 0 {
                            if !first {
                                out.push_str(", ");
                            }
                            out.push_str(&format!("... {} more", hash_count));
                        }
                        out.push('}');
                        out
                    }
                    None => "{}".to_string(),
                },
                ObjRef::Trait(id) => match self.traits.get(id.0) {
                    Some(t) => format!("<trait {}>", self.string(t.name)),
                    None => "<trait>".to_string(),
                },
            },
        }
    }

    fn display_function(&self, id: FunctionId) -> String {
        match self.functions.get(id.0).and_then(|f| f.name) {
            Some(name) => format!("<fn {}>", self.string(name)),
            None => "<script>".to_string(),
        }
    }
}

impl Default for ObjectPool {
    fn default() -> Self {
        Self::new()
    }
}

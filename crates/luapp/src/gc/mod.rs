// Mark-and-sweep garbage collector.
//
// Precise, non-moving, non-incremental. The VM checks the byte balance before
// every growing allocation and runs a full collection when it crosses the
// threshold (or always, under stress mode). Roots are supplied by the VM:
// stack slots, frame closures, open upvalues, globals, the cached "init"
// string, pinned compiler state and the module cache. Marking drains an
// explicit gray worklist; sweeping walks every arena and frees what stayed
// unmarked. The string intern table is weak: entries for unmarked strings are
// dropped before the sweep so a dead string can never be found by content
// again.

mod object_pool;

pub use object_pool::*;

use crate::value::{ObjRef, Value};

const GC_HEAP_GROW_FACTOR: usize = 2;
const GC_FIRST_THRESHOLD: usize = 1024 * 1024;

pub struct GC {
    /// Running byte balance, updated on every allocation and free.
    pub allocated: usize,
    /// Next collection fires when `allocated` exceeds this.
    pub threshold: usize,
    /// Marked-but-not-traversed objects.
    gray: Vec<ObjRef>,
    /// Collections completed, for the log and for tests.
    pub collections: usize,
}

impl GC {
    pub fn new() -> Self {
        GC {
            allocated: 0,
            threshold: GC_FIRST_THRESHOLD,
            gray: Vec::new(),
            collections: 0,
        }
    }

    #[inline]
    pub fn account_alloc(&mut self, size: usize) {
        self.allocated += size;
    }

    #[inline]
    pub fn account_dealloc(&mut self, size: usize) {
        self.allocated = self.allocated.saturating_sub(size);
    }

    #[inline]
    pub fn should_collect(&self) -> bool {
        self.allocated > self.threshold
    }

    // ============ Mark phase ============

    #[inline]
    pub fn mark_value(&mut self, pool: &mut ObjectPool, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(pool, r);
        }
    }

    /// Set the mark bit and queue the object for traversal. Already-marked
    /// objects are skipped, which is what terminates marking on cycles.
    pub fn mark_object(&mut self, pool: &mut ObjectPool, r: ObjRef) {
        let header = match r {
            ObjRef::String(id) => pool.strings.get_mut(id.0).map(|o| &mut o.header),
            ObjRef::Function(id) => pool.functions.get_mut(id.0).map(|o| &mut o.header),
            ObjRef::Native(id) => pool.natives.get_mut(id.0).map(|o| &mut o.header),
            ObjRef::Closure(id) => pool.closures.get_mut(id.0).map(|o| &mut o.header),
            ObjRef::Upvalue(id) => pool.upvalues.get_mut(id.0).map(|o| &mut o.header),
            ObjRef::Class(id) => pool.classes.get_mut(id.0).map(|o| &mut o.header),
            ObjRef::Instance(id) => pool.instances.get_mut(id.0).map(|o| &mut o.header),
            ObjRef::BoundMethod(id) => pool.bound_methods.get_mut(id.0).map(|o| &mut o.header),
            ObjRef::Table(id) => pool.tables.get_mut(id.0).map(|o| &mut o.header),
            ObjRef::Trait(id) => pool.traits.get_mut(id.0).map(|o| &mut o.header),
        };
        if let Some(header) = header {
            if !header.marked {
                header.marked = true;
                self.gray.push(r);
            }
        }
    }

    /// Drain the gray worklist, blackening each object.
    pub fn trace_references(&mut self, pool: &mut ObjectPool) {
        while let Some(r) = self.gray.pop() {
            self.blacken(pool, r);
        }
    }

    /// Mark everything an object refers to. Children are gathered first so
    /// the arena borrow ends before marking mutates headers.
    fn blacken(&mut self, pool: &mut ObjectPool, r: ObjRef) {
        let mut children: Vec<Value> = Vec::new();
        {
            let p: &ObjectPool = pool;
            match r {
                // Strings and natives have no outgoing references.
                ObjRef::String(_) | ObjRef::Native(_) => {}
                ObjRef::Upvalue(id) => {
                    if let Some(up) = p.upvalues.get(id.0) {
                        if let UpvalueState::Closed(v) = up.state {
                            children.push(v);
                        }
                    }
                }
                ObjRef::Function(id) => {
                    if let Some(f) = p.functions.get(id.0) {
                        if let Some(name) = f.name {
                            children.push(Value::string(name));
                        }
                        children.extend(f.chunk.constants.iter());
                    }
                }
                ObjRef::Closure(id) => {
                    if let Some(c) = p.closures.get(id.0) {
                        children.push(Value::function(c.function));
                        children.extend(c.upvalues.iter().map(|&u| Value::Obj(ObjRef::Upvalue(u))));
                    }
                }
                ObjRef::Class(id) => {
                    if let Some(c) = p.classes.get(id.0) {
                        children.push(Value::string(c.name));
                        if let Some(sup) = c.superclass {
                            children.push(Value::class(sup));
                        }
                        collect_table(&c.methods, &mut children);
                        collect_table(&c.privates, &mut children);
                    }
                }
                ObjRef::Instance(id) => {
                    if let Some(i) = p.instances.get(id.0) {
                        children.push(Value::class(i.class));
                        collect_table(&i.fields, &mut children);
                    }
                }
                ObjRef::BoundMethod(id) => {
                    if let Some(b) = p.bound_methods.get(id.0) {
                        children.push(b.receiver);
                        children.push(Value::closure(b.method));
                    }
                }
                ObjRef::Table(id) => {
                    if let Some(t) = p.tables.get(id.0) {
                        collect_table(&t.entries, &mut children);
                        children.extend(t.array.iter());
                    }
                }
                ObjRef::Trait(id) => {
                    if let Some(t) = p.traits.get(id.0) {
                        children.push(Value::string(t.name));
                        collect_table(&t.methods, &mut children);
                    }
                }
            }
        }
        for child in children {
            self.mark_value(pool, child);
        }
    }

    // ============ Sweep phase ============

    /// Drop weak intern entries, then free every unmarked object and clear
    /// surviving marks for the next cycle. Returns the number of objects
    /// freed.
    pub fn sweep(&mut self, pool: &mut ObjectPool) -> usize {
        // Weak intern table: an unmarked string must not be re-findable by
        // content once this collection completes.
        pool.intern.remove_white(&pool.strings);

        let mut freed = 0;
        freed += sweep_arena(&mut pool.strings, self);
        freed += sweep_arena(&mut pool.functions, self);
        freed += sweep_arena(&mut pool.natives, self);
        freed += sweep_arena(&mut pool.closures, self);
        freed += sweep_arena(&mut pool.upvalues, self);
        freed += sweep_arena(&mut pool.classes, self);
        freed += sweep_arena(&mut pool.instances, self);
        freed += sweep_arena(&mut pool.bound_methods, self);
        freed += sweep_arena(&mut pool.tables, self);
        freed += sweep_arena(&mut pool.traits, self);
        freed
    }

    /// Reset the trigger after a collection.
    pub fn finish_cycle(&mut self) {
        self.threshold = self.allocated.max(1) * GC_HEAP_GROW_FACTOR;
        self.collections += 1;
    }
}

impl Default for GC {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_table(table: &crate::value::Table, out: &mut Vec<Value>) {
    for (key, value) in table.iter() {
        out.push(Value::string(key));
        out.push(value);
    }
}

fn sweep_arena<T: HasHeader>(arena: &mut Arena<T>, gc: &mut GC) -> usize {
    let mut freed = 0;
    for id in arena.live_ids() {
        let keep = {
            let header = arena.get_mut(id).expect("live id").header_mut();
            if header.marked {
                header.marked = false;
                true
            } else {
                false
            }
        };
        if !keep {
            if let Some(mut obj) = arena.free(id) {
                gc.account_dealloc(obj.header_mut().size as usize);
                freed += 1;
            }
        }
    }
    freed
}

/// Uniform access to the embedded header, for the sweep.
trait HasHeader {
    fn header_mut(&mut self) -> &mut GcHeader;
}

macro_rules! impl_has_header {
    ($($ty:ty),* $(,)?) => {
        $(impl HasHeader for $ty {
            #[inline]
            fn header_mut(&mut self) -> &mut GcHeader {
                &mut self.header
            }
        })*
    };
}

impl_has_header!(
    GcString,
    GcFunction,
    GcNative,
    GcClosure,
    GcUpvalue,
    GcClass,
    GcInstance,
    GcBoundMethod,
    GcTable,
    GcTrait,
);

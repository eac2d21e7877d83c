use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

/// An index into the `Heap` arena. Stands in for a heap pointer — spec.md
/// §9 calls for exactly this: "encode every heap object by index-or-
/// reference into the single allocation list owned by the VM".
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct ObjHandle(usize);

pub struct ObjString {
    pub chars: String,
    pub hash: u32,
}

pub struct ObjFunction {
    pub arity: u8,
    pub chunk: Chunk,
    /// `None` for the nameless top-level script.
    pub name: Option<ObjHandle>,
}

impl ObjFunction {
    fn new(name: Option<ObjHandle>) -> Self {
        ObjFunction {
            arity: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

pub struct ObjNative {
    pub name: ObjHandle,
    pub function: NativeFn,
}

pub enum HeapObjectKind {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
}

impl HeapObjectKind {
    fn approx_size(&self) -> usize {
        match self {
            HeapObjectKind::String(s) => s.chars.len() + 32,
            HeapObjectKind::Function(f) => f.chunk.len() * 2 + f.chunk.constants().len() * 16 + 64,
            HeapObjectKind::Native(_) => 32,
        }
    }
}

struct HeapObject {
    marked: bool,
    kind: HeapObjectKind,
}

fn string_hash_from(objects: &[Option<HeapObject>], handle: ObjHandle) -> u32 {
    match &objects[handle.0].as_ref().expect("dangling handle").kind {
        HeapObjectKind::String(s) => s.hash,
        _ => unreachable!("handle did not reference a String"),
    }
}

/// Every root source the GC must see at the moment `collect_garbage` runs.
/// Built fresh by the caller (the VM's dispatch loop, or the compiler) from
/// whatever state it currently owns — there is no hidden global root set.
pub struct Roots<'a> {
    pub stack: &'a [Value],
    pub frame_functions: &'a [ObjHandle],
    pub globals: &'a Table,
    pub compiler_functions: &'a [ObjHandle],
}

impl<'a> Roots<'a> {
    pub fn empty(globals: &'a Table) -> Self {
        Roots {
            stack: &[],
            frame_functions: &[],
            globals,
            compiler_functions: &[],
        }
    }
}

/// FNV-1a over the raw bytes, matching spec.md §3's cached 32-bit string
/// hash.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

const INITIAL_NEXT_GC: usize = 1024 * 1024;
const GC_HEAP_GROW_FACTOR: usize = 2;

/// The single allocation list plus the string-interning table, addressed
/// by `ObjHandle`. Owns every heap object's storage; freeing a `Function`
/// frees its `Chunk` because the `Chunk` is a plain field of it, not a
/// separate allocation.
pub struct Heap {
    objects: Vec<Option<HeapObject>>,
    free_list: Vec<usize>,
    strings: Table,
    gray_stack: Vec<ObjHandle>,
    bytes_allocated: usize,
    next_gc: usize,
    pub stress_gc: bool,
    /// Number of `collect_garbage` calls so far (for tests and `debug-trace`).
    pub gc_count: usize,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: Vec::new(),
            free_list: Vec::new(),
            strings: Table::new(),
            gray_stack: Vec::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            stress_gc: false,
            gc_count: 0,
        }
    }

    fn insert(&mut self, kind: HeapObjectKind, roots: Roots) -> ObjHandle {
        let size = kind.approx_size();
        self.bytes_allocated += size;
        if self.stress_gc || self.bytes_allocated > self.next_gc {
            self.collect_garbage(roots);
            if self.bytes_allocated > self.next_gc {
                self.next_gc = self.bytes_allocated.saturating_mul(GC_HEAP_GROW_FACTOR);
            }
        }

        let object = Some(HeapObject {
            marked: false,
            kind,
        });
        match self.free_list.pop() {
            Some(index) => {
                self.objects[index] = object;
                ObjHandle(index)
            }
            None => {
                self.objects.push(object);
                ObjHandle(self.objects.len() - 1)
            }
        }
    }

    /// Interns `s`: returns the existing handle if an equal-content string
    /// is already live, otherwise allocates a new one. Matches `copyString`
    /// / `takeString` in spec.md §8 — both paths funnel through here so
    /// equal contents always yield identical handles.
    pub fn alloc_string(&mut self, s: String, roots: Roots) -> ObjHandle {
        let hash = fnv1a_hash(s.as_bytes());
        if let Some(existing) = self.strings.find_string(self, &s, hash) {
            return existing;
        }
        let handle = self.insert(HeapObjectKind::String(ObjString { chars: s, hash }), roots);
        // Handles are stable indices, so `insert`'s possible GC pass above
        // can't invalidate `handle`; safe to register it now.
        let objects = &self.objects;
        self.strings
            .set(handle, hash, Value::Nil, |h| string_hash_from(objects, h));
        handle
    }

    pub fn alloc_function(&mut self, name: Option<ObjHandle>, roots: Roots) -> ObjHandle {
        self.insert(HeapObjectKind::Function(ObjFunction::new(name)), roots)
    }

    pub fn alloc_native(&mut self, name: ObjHandle, function: NativeFn, roots: Roots) -> ObjHandle {
        self.insert(HeapObjectKind::Native(ObjNative { name, function }), roots)
    }

    pub fn get_string(&self, handle: ObjHandle) -> &ObjString {
        match &self.objects[handle.0].as_ref().expect("dangling handle").kind {
            HeapObjectKind::String(s) => s,
            _ => unreachable!("handle did not reference a String"),
        }
    }

    pub fn get_function(&self, handle: ObjHandle) -> &ObjFunction {
        match &self.objects[handle.0].as_ref().expect("dangling handle").kind {
            HeapObjectKind::Function(f) => f,
            _ => unreachable!("handle did not reference a Function"),
        }
    }

    pub fn get_function_mut(&mut self, handle: ObjHandle) -> &mut ObjFunction {
        match &mut self.objects[handle.0].as_mut().expect("dangling handle").kind {
            HeapObjectKind::Function(f) => f,
            _ => unreachable!("handle did not reference a Function"),
        }
    }

    pub fn get_native(&self, handle: ObjHandle) -> &ObjNative {
        match &self.objects[handle.0].as_ref().expect("dangling handle").kind {
            HeapObjectKind::Native(n) => n,
            _ => unreachable!("handle did not reference a Native"),
        }
    }

    pub fn is_string(&self, handle: ObjHandle) -> bool {
        matches!(
            self.objects[handle.0].as_ref().expect("dangling handle").kind,
            HeapObjectKind::String(_)
        )
    }

    pub fn is_function(&self, handle: ObjHandle) -> bool {
        matches!(
            self.objects[handle.0].as_ref().expect("dangling handle").kind,
            HeapObjectKind::Function(_)
        )
    }

    pub fn is_native(&self, handle: ObjHandle) -> bool {
        matches!(
            self.objects[handle.0].as_ref().expect("dangling handle").kind,
            HeapObjectKind::Native(_)
        )
    }

    pub fn hash_of_string(&self, handle: ObjHandle) -> u32 {
        self.get_string(handle).hash
    }

    pub fn display_object(&self, handle: ObjHandle) -> String {
        match &self.objects[handle.0].as_ref().expect("dangling handle").kind {
            HeapObjectKind::String(s) => s.chars.clone(),
            HeapObjectKind::Function(f) => match f.name {
                Some(name) => format!("<fn {}>", self.get_string(name).chars),
                None => "<script>".to_string(),
            },
            HeapObjectKind::Native(_) => "<native fn>".to_string(),
        }
    }

    // ---- GC -----------------------------------------------------------

    fn mark_value(&mut self, value: Value) {
        if let Value::Obj(handle) = value {
            self.mark_object(handle);
        }
    }

    fn mark_object(&mut self, handle: ObjHandle) {
        if let Some(Some(obj)) = self.objects.get_mut(handle.0) {
            if !obj.marked {
                obj.marked = true;
                self.gray_stack.push(handle);
            }
        }
    }

    fn blacken_object(&mut self, handle: ObjHandle) {
        let referents: Vec<ObjHandle> = match &self.objects[handle.0].as_ref().unwrap().kind {
            HeapObjectKind::String(_) => Vec::new(),
            HeapObjectKind::Native(n) => vec![n.name],
            HeapObjectKind::Function(f) => {
                let mut refs = Vec::new();
                if let Some(name) = f.name {
                    refs.push(name);
                }
                for constant in f.chunk.constants() {
                    if let Value::Obj(h) = constant {
                        refs.push(*h);
                    }
                }
                refs
            }
        };
        for r in referents {
            self.mark_object(r);
        }
    }

    fn trace_references(&mut self) {
        while let Some(handle) = self.gray_stack.pop() {
            self.blacken_object(handle);
        }
    }

    fn sweep(&mut self) {
        for index in 0..self.objects.len() {
            match &mut self.objects[index] {
                Some(obj) if obj.marked => obj.marked = false,
                Some(_) => {
                    self.objects[index] = None;
                    self.free_list.push(index);
                }
                None => {}
            }
        }
    }

    /// Mark roots, trace the gray worklist to fixpoint, drop intern-table
    /// entries for strings about to die, then sweep. Matches the four
    /// steps of spec.md §4.5.
    pub fn collect_garbage(&mut self, roots: Roots) {
        self.gc_count += 1;
        self.gray_stack.clear();

        for value in roots.stack {
            self.mark_value(*value);
        }
        for handle in roots.frame_functions {
            self.mark_object(*handle);
        }
        for handle in roots.compiler_functions {
            self.mark_object(*handle);
        }
        let global_entries: Vec<(ObjHandle, Value)> = roots.globals.iter().collect();
        for (key, value) in global_entries {
            self.mark_object(key);
            self.mark_value(value);
        }

        self.trace_references();

        let objects = &self.objects;
        self.strings.remove_white(|h| {
            objects
                .get(h.0)
                .and_then(|o| o.as_ref())
                .map(|o| o.marked)
                .unwrap_or(false)
        });

        self.sweep();
    }

    pub fn object_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_some()).count()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_collapses_equal_strings() {
        let mut heap = Heap::new();
        let globals = Table::new();
        let a = heap.alloc_string("hi".to_string(), Roots::empty(&globals));
        let b = heap.alloc_string("hi".to_string(), Roots::empty(&globals));
        assert_eq!(a, b);
        let c = heap.alloc_string("bye".to_string(), Roots::empty(&globals));
        assert_ne!(a, c);
    }

    #[test]
    fn unreachable_strings_are_collected() {
        let mut heap = Heap::new();
        let mut globals = Table::new();
        let kept = heap.alloc_string("kept".to_string(), Roots::empty(&globals));
        let kept_hash = heap.hash_of_string(kept);
        globals.set(kept, kept_hash, Value::Nil, |h| heap.hash_of_string(h));
        let _unreachable = heap.alloc_string("gone".to_string(), Roots::empty(&globals));

        heap.collect_garbage(Roots::empty(&globals));

        assert!(heap.strings.find_string(&heap, "kept", kept_hash).is_some());
        let gone_hash = fnv1a_hash("gone".as_bytes());
        assert!(heap.strings.find_string(&heap, "gone", gone_hash).is_none());
    }
}

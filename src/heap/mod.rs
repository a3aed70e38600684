mod gc;

pub use gc::{GcConfig, GcStats, Marker, NoRoots, Trace};
use gc::MarkBits;

use crate::object::{
    hash_string, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjKind,
    ObjNative, ObjRef, ObjString, ObjUpvalue,
};
use crate::table::{Key, Table};
use crate::value::{format_number, Value};

/// Arena of every live object.
///
/// Slots are addressed by `ObjRef`. A swept slot goes on the free list and is
/// handed out again by a later allocation. Mark bits live beside the arena,
/// not in the objects.
pub struct Heap {
    objects: Vec<Option<Obj>>,
    marks: MarkBits,
    free: Vec<u32>,
    gray: Vec<ObjRef>,
    /// Intern set. Weak: pruned by the collector, never traced.
    strings: Table,
    bytes_allocated: usize,
    next_gc: usize,
    config: GcConfig,
    stats: GcStats,
}

impl Heap {
    pub fn new(config: GcConfig) -> Self {
        Heap {
            objects: Vec::new(),
            marks: MarkBits::default(),
            free: Vec::new(),
            gray: Vec::new(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: config.initial_threshold,
            config,
            stats: GcStats::default(),
        }
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_live(&self, r: ObjRef) -> bool {
        self.objects.get(r.index()).is_some_and(Option::is_some)
    }

    /// The single allocation path. Collects first when the heap is over
    /// budget; `obj` itself is traced as a root so anything only it refers
    /// to survives that collection.
    pub fn alloc(&mut self, obj: Obj, roots: &dyn Trace) -> ObjRef {
        if self.should_collect() {
            self.collect(&[roots, &obj]);
        }
        self.insert(obj)
    }

    fn insert(&mut self, obj: Obj) -> ObjRef {
        let size = obj.size_hint();
        let kind = obj.kind();
        let index = match self.free.pop() {
            Some(index) => {
                self.objects[index as usize] = Some(obj);
                index
            }
            None => {
                let Ok(index) = u32::try_from(self.objects.len()) else {
                    log::error!("object arena exhausted at {} slots", self.objects.len());
                    std::process::abort();
                };
                self.objects.push(Some(obj));
                index
            }
        };
        self.bytes_allocated += size;
        self.stats.objects_allocated += 1;
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.bytes_allocated);
        log::trace!("alloc #{} {} ({} bytes)", index, kind.name(), size);
        ObjRef::from_index(index)
    }

    /// Interns a copy of `chars`.
    pub fn copy_string(&mut self, chars: &str, roots: &dyn Trace) -> ObjRef {
        let hash = hash_string(chars);
        if let Some(existing) = self.find_string(chars, hash) {
            return existing;
        }
        self.intern(chars.into(), hash, roots)
    }

    /// Interns an owned buffer, dropping it if the content already exists.
    pub fn take_string(&mut self, chars: String, roots: &dyn Trace) -> ObjRef {
        let hash = hash_string(&chars);
        if let Some(existing) = self.find_string(&chars, hash) {
            return existing;
        }
        self.intern(chars.into_boxed_str(), hash, roots)
    }

    fn find_string(&self, chars: &str, hash: u32) -> Option<ObjRef> {
        self.strings
            .find_interned(chars, hash, |r| &*self.string(r).chars)
    }

    fn intern(&mut self, chars: Box<str>, hash: u32, roots: &dyn Trace) -> ObjRef {
        let r = self.alloc(Obj::String(ObjString { chars, hash }), roots);
        let before = self.strings.capacity();
        self.strings.set(Key { string: r, hash }, Value::NULL);
        self.charge_growth(before, self.strings.capacity());
        r
    }

    /// Adds table growth to the running total. Tables never shrink, so
    /// whatever is charged here is given back when the owner is swept.
    fn charge_growth(&mut self, before: usize, after: usize) {
        self.bytes_allocated += after.saturating_sub(before) * Table::ENTRY_SIZE;
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.bytes_allocated);
    }

    /// `Table::set` on a table owned outside the arena, such as the globals.
    pub fn table_set(&mut self, table: &mut Table, key: Key, value: Value) -> bool {
        let before = table.capacity();
        let is_new = table.set(key, value);
        self.charge_growth(before, table.capacity());
        is_new
    }

    pub fn set_field(&mut self, instance: ObjRef, key: Key, value: Value) -> bool {
        let fields = &mut self.instance_mut(instance).fields;
        let before = fields.capacity();
        let is_new = fields.set(key, value);
        let after = fields.capacity();
        self.charge_growth(before, after);
        is_new
    }

    pub fn set_method(&mut self, class: ObjRef, key: Key, method: Value) {
        let methods = &mut self.class_mut(class).methods;
        let before = methods.capacity();
        methods.set(key, method);
        let after = methods.capacity();
        self.charge_growth(before, after);
    }

    /// Copies every method of `superclass` into `subclass`.
    pub fn inherit(&mut self, subclass: ObjRef, superclass: ObjRef) {
        let inherited = self.class(superclass).methods.clone();
        let methods = &mut self.class_mut(subclass).methods;
        let before = methods.capacity();
        inherited.add_all(methods);
        let after = methods.capacity();
        self.charge_growth(before, after);
    }

    pub fn key(&self, string: ObjRef) -> Key {
        Key { string, hash: self.string(string).hash }
    }

    pub fn get(&self, r: ObjRef) -> &Obj {
        match self.objects.get(r.index()) {
            Some(Some(obj)) => obj,
            _ => panic!("dangling object handle #{}", r.index()),
        }
    }

    fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        match self.objects.get_mut(r.index()) {
            Some(Some(obj)) => obj,
            _ => panic!("dangling object handle #{}", r.index()),
        }
    }

    pub fn string(&self, r: ObjRef) -> &ObjString {
        match self.get(r) {
            Obj::String(s) => s,
            other => unreachable!("expected string, found {}", other.kind().name()),
        }
    }

    pub fn function(&self, r: ObjRef) -> &ObjFunction {
        match self.get(r) {
            Obj::Function(f) => f,
            other => unreachable!("expected function, found {}", other.kind().name()),
        }
    }

    pub fn native(&self, r: ObjRef) -> &ObjNative {
        match self.get(r) {
            Obj::Native(n) => n,
            other => unreachable!("expected native, found {}", other.kind().name()),
        }
    }

    pub fn closure(&self, r: ObjRef) -> &ObjClosure {
        match self.get(r) {
            Obj::Closure(c) => c,
            other => unreachable!("expected closure, found {}", other.kind().name()),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> ObjUpvalue {
        match self.get(r) {
            Obj::Upvalue(u) => *u,
            other => unreachable!("expected upvalue, found {}", other.kind().name()),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut ObjUpvalue {
        match self.get_mut(r) {
            Obj::Upvalue(u) => u,
            other => unreachable!("expected upvalue, found {}", other.kind().name()),
        }
    }

    pub fn class(&self, r: ObjRef) -> &ObjClass {
        match self.get(r) {
            Obj::Class(c) => c,
            other => unreachable!("expected class, found {}", other.kind().name()),
        }
    }

    fn class_mut(&mut self, r: ObjRef) -> &mut ObjClass {
        match self.get_mut(r) {
            Obj::Class(c) => c,
            other => unreachable!("expected class, found {}", other.kind().name()),
        }
    }

    pub fn instance(&self, r: ObjRef) -> &ObjInstance {
        match self.get(r) {
            Obj::Instance(i) => i,
            other => unreachable!("expected instance, found {}", other.kind().name()),
        }
    }

    fn instance_mut(&mut self, r: ObjRef) -> &mut ObjInstance {
        match self.get_mut(r) {
            Obj::Instance(i) => i,
            other => unreachable!("expected instance, found {}", other.kind().name()),
        }
    }

    pub fn bound_method(&self, r: ObjRef) -> &ObjBoundMethod {
        match self.get(r) {
            Obj::BoundMethod(b) => b,
            other => unreachable!("expected bound method, found {}", other.kind().name()),
        }
    }

    pub fn kind(&self, value: Value) -> Option<ObjKind> {
        value.as_object().map(|r| self.get(r).kind())
    }

    pub fn as_string(&self, value: Value) -> Option<&ObjString> {
        match self.get(value.as_object()?) {
            Obj::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self, value: Value) -> &'static str {
        match value.primitive_type_name() {
            Some(name) => name,
            None => self.kind(value).map_or("object", ObjKind::name),
        }
    }

    /// Printed form of a value, as `print` writes it.
    pub fn display(&self, value: Value) -> String {
        if let Some(r) = value.as_object() {
            return self.display_object(r);
        }
        if let Some(n) = value.as_number() {
            format_number(n)
        } else if let Some(b) = value.as_bool() {
            b.to_string()
        } else {
            "null".to_string()
        }
    }

    fn display_object(&self, r: ObjRef) -> String {
        match self.get(r) {
            Obj::String(s) => s.chars.to_string(),
            Obj::Function(f) => self.display_function(f),
            Obj::Native(_) => "<native fn>".to_string(),
            Obj::Closure(c) => self.display_function(self.function(c.function)),
            Obj::Upvalue(_) => "upvalue".to_string(),
            Obj::Class(c) => self.string(c.name).chars.to_string(),
            Obj::Instance(i) => {
                format!("{} instance", self.string(self.class(i.class).name).chars)
            }
            Obj::BoundMethod(b) => self.display_object(b.method),
        }
    }

    fn display_function(&self, f: &ObjFunction) -> String {
        match f.name {
            Some(name) => format!("<fn {}>", self.string(name).chars),
            None => "<script>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::chunk::Chunk;

    fn heap() -> Heap {
        Heap::new(GcConfig::default())
    }

    #[test]
    fn interning_is_idempotent() {
        let mut heap = heap();
        let a = heap.copy_string("hello", &NoRoots);
        let b = heap.copy_string("hello", &NoRoots);
        let c = heap.take_string(String::from("hel") + "lo", &NoRoots);
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(heap.len(), 1);
        assert_ne!(a, heap.copy_string("world", &NoRoots));
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = heap();
        let a = heap.copy_string("a", &NoRoots);
        let _b = heap.copy_string("b", &NoRoots);
        heap.collect(&[]);
        assert!(heap.is_empty());
        let c = heap.copy_string("c", &NoRoots);
        assert!(c.index() <= a.index() + 1, "arena grew instead of reusing a slot");
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn display_formats() {
        let mut heap = heap();
        assert_eq!(heap.display(Value::number(3.0)), "3");
        assert_eq!(heap.display(Value::number(2.5)), "2.5");
        assert_eq!(heap.display(Value::boolean(true)), "true");
        assert_eq!(heap.display(Value::NULL), "null");

        let name = heap.copy_string("Point", &NoRoots);
        let class = heap.alloc(Obj::Class(ObjClass { name, methods: Table::new() }), &NoRoots);
        let instance =
            heap.alloc(Obj::Instance(ObjInstance { class, fields: Table::new() }), &NoRoots);
        assert_eq!(heap.display(Value::object(class)), "Point");
        assert_eq!(heap.display(Value::object(instance)), "Point instance");

        let fname = heap.copy_string("area", &NoRoots);
        let function = heap.alloc(
            Obj::Function(ObjFunction {
                arity: 0,
                upvalue_count: 0,
                name: Some(fname),
                chunk: Rc::new(Chunk::new()),
            }),
            &NoRoots,
        );
        let closure =
            heap.alloc(Obj::Closure(ObjClosure { function, upvalues: Vec::new() }), &NoRoots);
        let bound = heap.alloc(
            Obj::BoundMethod(ObjBoundMethod { receiver: Value::object(instance), method: closure }),
            &NoRoots,
        );
        assert_eq!(heap.display(Value::object(function)), "<fn area>");
        assert_eq!(heap.display(Value::object(closure)), "<fn area>");
        assert_eq!(heap.display(Value::object(bound)), "<fn area>");

        let script = heap.alloc(
            Obj::Function(ObjFunction {
                arity: 0,
                upvalue_count: 0,
                name: None,
                chunk: Rc::new(Chunk::new()),
            }),
            &NoRoots,
        );
        assert_eq!(heap.display(Value::object(script)), "<script>");
    }

    #[test]
    fn type_names() {
        let mut heap = heap();
        let s = heap.copy_string("x", &NoRoots);
        assert_eq!(heap.type_name(Value::object(s)), "string");
        assert_eq!(heap.type_name(Value::number(1.0)), "number");
        assert_eq!(heap.type_name(Value::NULL), "null");
        assert_eq!(heap.as_string(Value::object(s)).map(|s| s.len()), Some(1));
        assert!(heap.as_string(Value::number(1.0)).is_none());
    }

    #[test]
    fn allocation_accounting() {
        let mut heap = heap();
        assert_eq!(heap.bytes_allocated(), 0);
        heap.copy_string("some bytes", &NoRoots);
        assert!(heap.bytes_allocated() >= "some bytes".len());
        assert_eq!(heap.stats().objects_allocated, 1);
        assert_eq!(heap.next_gc(), GcConfig::default().initial_threshold);
    }

    #[test]
    fn field_growth_is_charged() {
        let mut heap = heap();
        let name = heap.copy_string("Bag", &NoRoots);
        let class = heap.alloc(Obj::Class(ObjClass { name, methods: Table::new() }), &NoRoots);
        let bag = heap.alloc(Obj::Instance(ObjInstance { class, fields: Table::new() }), &NoRoots);
        let before = heap.bytes_allocated();

        for i in 0..1000 {
            let field = heap.copy_string(&format!("f{i}"), &NoRoots);
            let key = heap.key(field);
            heap.set_field(bag, key, Value::number(i as f64));
        }
        let capacity = heap.instance(bag).fields.capacity();
        assert!(capacity >= 1000);
        assert!(heap.bytes_allocated() - before >= capacity * Table::ENTRY_SIZE);
    }

    #[test]
    fn sweeping_gives_charged_growth_back() {
        let mut heap = heap();
        let name = heap.copy_string("Bag", &NoRoots);
        let class = heap.alloc(Obj::Class(ObjClass { name, methods: Table::new() }), &NoRoots);
        let bag = heap.alloc(Obj::Instance(ObjInstance { class, fields: Table::new() }), &NoRoots);
        let key = heap.key(name);
        heap.set_field(bag, key, Value::NULL);
        heap.collect(&[&class]);

        // Only the class, its name and the intern table remain.
        assert!(!heap.is_live(bag));
        let expected = heap.get(class).size_hint()
            + heap.get(name).size_hint()
            + heap.strings.capacity() * Table::ENTRY_SIZE;
        assert_eq!(heap.bytes_allocated(), expected);
    }

    #[test]
    fn inherit_copies_and_charges_methods() {
        let mut heap = heap();
        let base_name = heap.copy_string("Base", &NoRoots);
        let derived_name = heap.copy_string("Derived", &NoRoots);
        let base =
            heap.alloc(Obj::Class(ObjClass { name: base_name, methods: Table::new() }), &NoRoots);
        let derived = heap
            .alloc(Obj::Class(ObjClass { name: derived_name, methods: Table::new() }), &NoRoots);
        let key = heap.key(base_name);
        heap.set_method(base, key, Value::number(1.0));

        let before = heap.bytes_allocated();
        heap.inherit(derived, base);
        assert_eq!(heap.class(derived).methods.get(key), Some(Value::number(1.0)));
        assert_eq!(
            heap.bytes_allocated() - before,
            heap.class(derived).methods.capacity() * Table::ENTRY_SIZE
        );
    }
}

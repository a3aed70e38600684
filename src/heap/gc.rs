use serde::Serialize;

use super::Heap;
use crate::object::{Obj, ObjRef, ObjUpvalue};
use crate::table::Table;
use crate::value::Value;

/// Collection pacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcConfig {
    /// Bytes allocated before the first collection.
    pub initial_threshold: usize,
    /// Floor for the threshold computed after each collection.
    pub min_threshold: usize,
    pub growth_factor: f64,
    /// Collect before every allocation.
    pub stress: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            initial_threshold: 1024 * 1024,
            min_threshold: 1024 * 1024,
            growth_factor: 2.0,
            stress: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub collections: u64,
    pub objects_allocated: u64,
    pub objects_freed: u64,
    pub bytes_freed: u64,
    pub peak_bytes: usize,
}

/// Anything that holds references into the heap: root sets and objects.
pub trait Trace {
    fn trace(&self, marker: &mut Marker<'_>);
}

/// One bit per arena slot.
#[derive(Debug, Default)]
pub(crate) struct MarkBits {
    words: Vec<u64>,
}

impl MarkBits {
    pub(crate) fn get(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|w| w & (1u64 << (index % 64)) != 0)
    }

    /// Returns true if the bit was previously clear.
    fn set(&mut self, index: usize) -> bool {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let bit = 1u64 << (index % 64);
        let fresh = self.words[word] & bit == 0;
        self.words[word] |= bit;
        fresh
    }

    fn clear(&mut self, index: usize) {
        if let Some(w) = self.words.get_mut(index / 64) {
            *w &= !(1u64 << (index % 64));
        }
    }
}

/// Marking half of the collector: the mark bits plus the gray worklist.
pub struct Marker<'a> {
    marks: &'a mut MarkBits,
    gray: &'a mut Vec<ObjRef>,
}

impl Marker<'_> {
    pub fn mark_value(&mut self, value: Value) {
        if let Some(r) = value.as_object() {
            self.mark_object(r);
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        if self.marks.set(r.index()) {
            self.gray.push(r);
        }
    }
}

impl Trace for Value {
    fn trace(&self, marker: &mut Marker<'_>) {
        marker.mark_value(*self);
    }
}

impl Trace for ObjRef {
    fn trace(&self, marker: &mut Marker<'_>) {
        marker.mark_object(*self);
    }
}

impl<T: Trace> Trace for Option<T> {
    fn trace(&self, marker: &mut Marker<'_>) {
        if let Some(inner) = self {
            inner.trace(marker);
        }
    }
}

impl<T: Trace> Trace for [T] {
    fn trace(&self, marker: &mut Marker<'_>) {
        for item in self {
            item.trace(marker);
        }
    }
}

impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, marker: &mut Marker<'_>) {
        self.as_slice().trace(marker);
    }
}

impl Trace for Table {
    fn trace(&self, marker: &mut Marker<'_>) {
        self.mark_all_entries(marker);
    }
}

/// Empty root set.
pub struct NoRoots;

impl Trace for NoRoots {
    fn trace(&self, _marker: &mut Marker<'_>) {}
}

impl Trace for Obj {
    fn trace(&self, marker: &mut Marker<'_>) {
        match self {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                f.name.trace(marker);
                f.chunk.constants.trace(marker);
            }
            Obj::Closure(c) => {
                marker.mark_object(c.function);
                c.upvalues.trace(marker);
            }
            // An open upvalue's slot is already a stack root.
            Obj::Upvalue(ObjUpvalue::Open(_)) => {}
            Obj::Upvalue(ObjUpvalue::Closed(v)) => marker.mark_value(*v),
            Obj::Class(c) => {
                marker.mark_object(c.name);
                c.methods.mark_all_entries(marker);
            }
            Obj::Instance(i) => {
                marker.mark_object(i.class);
                i.fields.mark_all_entries(marker);
            }
            Obj::BoundMethod(b) => {
                marker.mark_value(b.receiver);
                marker.mark_object(b.method);
            }
        }
    }
}

impl Heap {
    pub fn should_collect(&self) -> bool {
        self.config.stress || self.bytes_allocated > self.next_gc
    }

    /// Full stop-the-world cycle: mark from `roots`, prune the intern table,
    /// sweep the arena.
    pub fn collect(&mut self, roots: &[&dyn Trace]) {
        let before = self.bytes_allocated;
        log::debug!("gc begin: {} bytes, {} objects", before, self.len());

        let Heap { objects, marks, gray, strings, free, .. } = self;
        let mut marker = Marker { marks, gray };
        for root in roots {
            root.trace(&mut marker);
        }
        while let Some(r) = marker.gray.pop() {
            if let Some(obj) = objects[r.index()].as_ref() {
                log::trace!("blacken #{} {}", r.index(), obj.kind().name());
                obj.trace(&mut marker);
            }
        }

        let pruned = strings.remove_unmarked_keys(|r| marks.get(r.index()));

        let mut freed = 0u64;
        let mut freed_bytes = 0usize;
        for (index, slot) in objects.iter_mut().enumerate() {
            let Some(obj) = slot else { continue };
            if marks.get(index) {
                marks.clear(index);
            } else {
                log::trace!("free #{} {}", index, obj.kind().name());
                freed_bytes += obj.size_hint();
                *slot = None;
                free.push(index as u32);
                freed += 1;
            }
        }

        let live_bytes = before.saturating_sub(freed_bytes);
        self.bytes_allocated = live_bytes;
        self.next_gc = ((live_bytes as f64 * self.config.growth_factor) as usize)
            .max(self.config.min_threshold);
        self.stats.collections += 1;
        self.stats.objects_freed += freed;
        self.stats.bytes_freed += before.saturating_sub(live_bytes) as u64;

        log::debug!(
            "gc end: freed {} objects ({} interned), {} -> {} bytes, next at {}",
            freed,
            pruned,
            before,
            live_bytes,
            self.next_gc
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjClass, ObjInstance};

    fn stress_heap() -> Heap {
        Heap::new(GcConfig { stress: true, ..GcConfig::default() })
    }

    #[test]
    fn mark_bits_set_get_clear() {
        let mut bits = MarkBits::default();
        assert!(!bits.get(130));
        assert!(bits.set(130));
        assert!(!bits.set(130));
        assert!(bits.get(130));
        bits.clear(130);
        assert!(!bits.get(130));
    }

    #[test]
    fn rooted_objects_survive() {
        let mut heap = Heap::new(GcConfig::default());
        let kept = heap.copy_string("kept", &NoRoots);
        let dropped = heap.copy_string("dropped", &NoRoots);
        heap.collect(&[&Value::object(kept)]);
        assert!(heap.is_live(kept));
        assert!(!heap.is_live(dropped));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn unreachable_cycle_is_reclaimed() {
        let mut heap = Heap::new(GcConfig::default());
        let name = heap.copy_string("Node", &NoRoots);
        let class = heap.alloc(Obj::Class(ObjClass { name, methods: Table::new() }), &NoRoots);
        let a = heap.alloc(Obj::Instance(ObjInstance { class, fields: Table::new() }), &name);
        let b = heap.alloc(Obj::Instance(ObjInstance { class, fields: Table::new() }), &name);
        let field = heap.copy_string("next", &NoRoots);
        let key = heap.key(field);
        heap.set_field(a, key, Value::object(b));
        heap.set_field(b, key, Value::object(a));

        heap.collect(&[&Value::object(a)]);
        assert!(heap.is_live(b));
        assert!(heap.is_live(class));
        assert!(heap.is_live(field));

        heap.collect(&[]);
        assert!(!heap.is_live(a));
        assert!(!heap.is_live(b));
        assert!(!heap.is_live(class));
        assert_eq!(heap.len(), 0);
        // Only the intern table's slots are still charged.
        assert_eq!(heap.bytes_allocated(), heap.strings.capacity() * Table::ENTRY_SIZE);
    }

    #[test]
    fn dead_strings_leave_the_intern_table() {
        let mut heap = Heap::new(GcConfig::default());
        let first = heap.copy_string("temp", &NoRoots);
        heap.collect(&[]);
        assert!(!heap.is_live(first));
        // Re-interning must allocate a fresh object rather than return a
        // handle to the swept one.
        let second = heap.copy_string("temp", &NoRoots);
        assert!(heap.is_live(second));
        assert_eq!(heap.string(second).chars.as_ref(), "temp");
    }

    #[test]
    fn stress_mode_keeps_pending_object_referents() {
        let mut heap = stress_heap();
        let name = heap.copy_string("Point", &NoRoots);
        // `name` is only reachable through the object being allocated.
        let class = heap.alloc(Obj::Class(ObjClass { name, methods: Table::new() }), &NoRoots);
        assert!(heap.is_live(name));
        assert_eq!(heap.string(heap.class(class).name).chars.as_ref(), "Point");
        assert!(heap.stats().collections >= 2);
    }

    #[test]
    fn threshold_follows_live_bytes() {
        let config = GcConfig { min_threshold: 16, ..GcConfig::default() };
        let mut heap = Heap::new(config);
        let s = heap.copy_string("abc", &NoRoots);
        heap.collect(&[&s]);
        let live = heap.bytes_allocated();
        assert!(live > 0);
        assert_eq!(heap.next_gc(), (live * 2).max(16));
    }
}

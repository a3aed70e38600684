use crate::heap::Marker;
use crate::object::ObjRef;
use crate::value::Value;

/// An interned string used as a table key, with its hash cached so probing
/// never has to go back to the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Key {
    pub string: ObjRef,
    pub hash: u32,
}

#[derive(Clone, Copy, Debug)]
enum Entry {
    Empty,
    /// Deleted entry; keeps probe sequences running past it.
    Tombstone,
    Live(Key, Value),
}

/// Open-addressed hash map from interned strings to values, with linear
/// probing over a power-of-two slot array.
#[derive(Clone, Debug, Default)]
pub struct Table {
    /// Live entries plus tombstones.
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub(crate) const ENTRY_SIZE: usize = std::mem::size_of::<Entry>();
    const MIN_CAPACITY: usize = 8;

    pub fn new() -> Self {
        Table::default()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: Key) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        match self.entries[find_slot(&self.entries, key)] {
            Entry::Live(_, value) => Some(value),
            _ => None,
        }
    }

    /// Returns true when `key` was not present before.
    pub fn set(&mut self, key: Key, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            let capacity = (self.entries.len() * 2).max(Self::MIN_CAPACITY);
            self.grow(capacity);
        }

        let slot = find_slot(&self.entries, key);
        let is_new = !matches!(self.entries[slot], Entry::Live(..));
        if matches!(self.entries[slot], Entry::Empty) {
            self.count += 1;
        }
        self.entries[slot] = Entry::Live(key, value);
        is_new
    }

    pub fn delete(&mut self, key: Key) -> bool {
        if self.count == 0 {
            return false;
        }
        let slot = find_slot(&self.entries, key);
        if matches!(self.entries[slot], Entry::Live(..)) {
            self.entries[slot] = Entry::Tombstone;
            true
        } else {
            false
        }
    }

    /// Copies every live entry of `self` into `dst`.
    pub fn add_all(&self, dst: &mut Table) {
        for (key, value) in self.iter() {
            dst.set(key, value);
        }
    }

    /// Interning lookup: compares content rather than identity. `resolve`
    /// maps a key back to its characters.
    pub fn find_interned<'a>(
        &self,
        chars: &str,
        hash: u32,
        resolve: impl Fn(ObjRef) -> &'a str,
    ) -> Option<ObjRef> {
        if self.count == 0 {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            match self.entries[index] {
                Entry::Empty => return None,
                Entry::Live(key, _) if key.hash == hash && resolve(key.string) == chars => {
                    return Some(key.string);
                }
                _ => {}
            }
            index = (index + 1) & mask;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, Value)> + '_ {
        self.entries.iter().filter_map(|entry| match *entry {
            Entry::Live(key, value) => Some((key, value)),
            _ => None,
        })
    }

    pub fn mark_all_entries(&self, marker: &mut Marker<'_>) {
        for (key, value) in self.iter() {
            marker.mark_object(key.string);
            marker.mark_value(value);
        }
    }

    /// Weak-reference cleanup: drops every entry whose key did not survive
    /// marking.
    pub fn remove_unmarked_keys(&mut self, is_marked: impl Fn(ObjRef) -> bool) -> usize {
        let mut removed = 0;
        for entry in &mut self.entries {
            if let Entry::Live(key, _) = *entry {
                if !is_marked(key.string) {
                    *entry = Entry::Tombstone;
                    removed += 1;
                }
            }
        }
        removed
    }

    fn grow(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![Entry::Empty; capacity]);
        self.count = 0;
        for entry in old {
            if let Entry::Live(key, value) = entry {
                let slot = find_slot(&self.entries, key);
                self.entries[slot] = Entry::Live(key, value);
                self.count += 1;
            }
        }
    }
}

/// Slot holding `key`, or the slot an insert should use: the first
/// tombstone passed on the way, else the terminating empty slot.
fn find_slot(entries: &[Entry], key: Key) -> usize {
    let mask = entries.len() - 1;
    let mut index = key.hash as usize & mask;
    let mut tombstone = None;
    loop {
        match entries[index] {
            Entry::Empty => return tombstone.unwrap_or(index),
            Entry::Tombstone => {
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            }
            Entry::Live(existing, _) if existing.string == key.string => return index,
            Entry::Live(..) => {}
        }
        index = (index + 1) & mask;
    }
}

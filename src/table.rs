use crate::object::{Heap, ObjHandle};
use crate::value::Value;

const TABLE_MAX_LOAD: f64 = 0.75;

/// `key = None, value = Nil` is a slot that was never occupied; `key =
/// None, value = Bool(true)` is a tombstone left by `delete` so that linear
/// probing chains through it. Only a live entry ever carries `key =
/// Some(_)`.
#[derive(Clone, Copy)]
pub struct Entry {
    key: Option<ObjHandle>,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry {
            key: None,
            value: Value::Nil,
        }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }
}

/// Open-addressed, linear-probing hash table keyed by interned string
/// handles. Used for both the VM's globals and the interning set (where
/// values are unused placeholders). Lookups other than `find_string`
/// compare keys by handle identity — safe because interning guarantees at
/// most one live `ObjString` per content (spec.md §4.2).
#[derive(Clone, Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Live entries plus tombstones.
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry(entries: &[Entry], capacity: usize, key: ObjHandle, hash: u32) -> usize {
        let mut index = hash as usize % capacity;
        let mut first_tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                Some(k) if k == key => return index,
                None => {
                    if entry.is_tombstone() {
                        if first_tombstone.is_none() {
                            first_tombstone = Some(index);
                        }
                    } else {
                        return first_tombstone.unwrap_or(index);
                    }
                }
                Some(_) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    /// Rehashes into a fresh array, dropping tombstones (per spec.md §4.2,
    /// the rebuilt `count` excludes them). `hash_of` supplies each live
    /// key's cached string hash.
    fn rehash(&mut self, new_capacity: usize, hash_of: impl Fn(ObjHandle) -> u32) {
        let mut new_entries = vec![Entry::empty(); new_capacity];
        let mut new_count = 0;
        for entry in self.entries.drain(..) {
            if let Some(key) = entry.key {
                let hash = hash_of(key);
                let index = Self::find_entry(&new_entries, new_capacity, key, hash);
                new_entries[index] = Entry {
                    key: Some(key),
                    value: entry.value,
                };
                new_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = new_count;
    }

    fn grow_capacity(capacity: usize) -> usize {
        if capacity < 8 {
            8
        } else {
            capacity * 2
        }
    }

    /// `set(key, value) -> wasNew`. Grows the table first if inserting
    /// would push the load factor past 0.75.
    pub fn set(&mut self, key: ObjHandle, hash: u32, value: Value, hash_of: impl Fn(ObjHandle) -> u32) -> bool {
        if self.count + 1 > (self.capacity() as f64 * TABLE_MAX_LOAD) as usize {
            let new_capacity = Self::grow_capacity(self.capacity());
            self.rehash(new_capacity, hash_of);
        }

        let capacity = self.capacity();
        let index = Self::find_entry(&self.entries, capacity, key, hash);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_none();
        if is_new_key && !entry.is_tombstone() {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    pub fn get(&self, key: ObjHandle, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Self::find_entry(&self.entries, self.capacity(), key, hash);
        self.entries[index].key.map(|_| self.entries[index].value)
    }

    pub fn contains(&self, key: ObjHandle, hash: u32) -> bool {
        self.get(key, hash).is_some()
    }

    pub fn delete(&mut self, key: ObjHandle, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_entry(&self.entries, self.capacity(), key, hash);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry {
            key: None,
            value: Value::Bool(true),
        };
        true
    }

    /// Copies every live entry from `self` into `dst` (used to seed a
    /// fresh globals table; not currently exercised by the language itself
    /// but kept per spec.md §4.2's contract).
    pub fn add_all(&self, dst: &mut Table, hash_of: impl Fn(ObjHandle) -> u32) {
        for entry in &self.entries {
            if let Some(key) = entry.key {
                let hash = hash_of(key);
                dst.set(key, hash, entry.value, &hash_of);
            }
        }
    }

    /// The interning lookup: compares by content (length, then hash, then
    /// bytes) instead of identity, so it can find the canonical handle for
    /// a freshly scanned string literal. Never allocates.
    pub fn find_string(&self, heap: &Heap, chars: &str, hash: u32) -> Option<ObjHandle> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.capacity();
        let mut index = hash as usize % capacity;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None if !entry.is_tombstone() => return None,
                Some(key) => {
                    let candidate = heap.get_string(key);
                    if candidate.hash == hash
                        && candidate.chars.len() == chars.len()
                        && candidate.chars == chars
                    {
                        return Some(key);
                    }
                }
                _ => {}
            }
            index = (index + 1) % capacity;
        }
    }

    /// Clears every entry whose key's mark bit is unset — called during GC
    /// right before sweeping so the intern table never ends up pointing at
    /// a freed `ObjString` (spec.md §4.2 `removeWhite`).
    pub fn remove_white(&mut self, is_marked: impl Fn(ObjHandle) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !is_marked(key) {
                    *entry = Entry {
                        key: None,
                        value: Value::Bool(true),
                    };
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjHandle, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{fnv1a_hash, Heap, Roots};

    #[test]
    fn set_then_get_returns_the_value() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let key = heap.alloc_string("a".to_string(), Roots::empty(&table));
        let hash = heap.hash_of_string(key);
        assert!(table.set(key, hash, Value::Number(1.0), |h| heap.hash_of_string(h)));
        assert_eq!(table.get(key, hash), Some(Value::Number(1.0)));
    }

    #[test]
    fn delete_then_reinsert_survives_tombstones() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let a = heap.alloc_string("a".to_string(), Roots::empty(&table));
        let b = heap.alloc_string("b".to_string(), Roots::empty(&table));
        let c = heap.alloc_string("c".to_string(), Roots::empty(&table));
        let (ha, hb, hc) = (
            heap.hash_of_string(a),
            heap.hash_of_string(b),
            heap.hash_of_string(c),
        );

        table.set(a, ha, Value::Number(1.0), |h| heap.hash_of_string(h));
        table.set(b, hb, Value::Number(2.0), |h| heap.hash_of_string(h));
        assert!(table.delete(a, ha));
        // Re-inserting under the tombstone left by `a`, then inserting a
        // fresh key, must not break the probe chain `b` relies on.
        table.set(c, hc, Value::Number(3.0), |h| heap.hash_of_string(h));
        assert_eq!(table.get(b, hb), Some(Value::Number(2.0)));
        assert_eq!(table.get(c, hc), Some(Value::Number(3.0)));
        assert_eq!(table.get(a, ha), None);
    }

    #[test]
    fn find_string_looks_up_by_content() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let key = heap.alloc_string("hello".to_string(), Roots::empty(&table));
        let hash = heap.hash_of_string(key);
        table.set(key, hash, Value::Nil, |h| heap.hash_of_string(h));

        assert_eq!(table.find_string(&heap, "hello", hash), Some(key));
        let other_hash = fnv1a_hash("nope".as_bytes());
        assert_eq!(table.find_string(&heap, "nope", other_hash), None);
    }

    #[test]
    fn add_all_copies_every_live_entry_into_the_destination() {
        let mut heap = Heap::new();
        let mut src = Table::new();
        let mut dst = Table::new();
        let a = heap.alloc_string("a".to_string(), Roots::empty(&src));
        let b = heap.alloc_string("b".to_string(), Roots::empty(&src));
        let (ha, hb) = (heap.hash_of_string(a), heap.hash_of_string(b));

        src.set(a, ha, Value::Number(1.0), |h| heap.hash_of_string(h));
        src.set(b, hb, Value::Number(2.0), |h| heap.hash_of_string(h));
        dst.set(a, ha, Value::Number(0.0), |h| heap.hash_of_string(h));

        src.add_all(&mut dst, |h| heap.hash_of_string(h));

        assert_eq!(dst.len(), 2);
        assert_eq!(dst.get(a, ha), Some(Value::Number(1.0)));
        assert_eq!(dst.get(b, hb), Some(Value::Number(2.0)));
    }
}

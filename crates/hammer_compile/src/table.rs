//! Open-addressed hash table with quadratic probing, used for the interned
//! string set, the globals table, and `Map` objects.
//!
//! Keys are always an [`ObjRef`] pointing at an interned string; lookups
//! against an already-interned key compare by identity (I2). The interner
//! itself needs to find a match *before* a candidate string is interned, so
//! [`Table::find_by_content`] takes a caller-supplied content comparator
//! instead of a key.

use crate::object::ObjRef;
use crate::value::Value;

const MAX_LOAD: f64 = 0.7;

#[derive(Clone)]
struct Entry {
    key: Option<ObjRef>,
    hash: u32,
    value: Value,
}

fn empty_entry() -> Entry {
    Entry { key: None, hash: 0, value: Value::Unit }
}

/// Quadratic-probe to the slot matching `is_match`, or the first empty or
/// tombstoned slot if no match exists. Mirrors the source table's probe
/// sequence: `index = (hash + i*i + index) % capacity`, `i` starting at 1.
fn probe(entries: &[Entry], hash: u32, mut is_match: impl FnMut(&Entry) -> bool) -> usize {
    let cap = entries.len() as u32;
    let mut tombstone: Option<usize> = None;
    let mut i: u32 = 1;
    let mut index = hash.wrapping_add(1) % cap;
    loop {
        let entry = &entries[index as usize];
        if entry.key.is_none() {
            if matches!(entry.value, Value::Unit) {
                return tombstone.unwrap_or(index as usize);
            } else if tombstone.is_none() {
                tombstone = Some(index as usize);
            }
        } else if is_match(entry) {
            return index as usize;
        }
        index = hash.wrapping_add(i.wrapping_mul(i)).wrapping_add(index) % cap;
        i = i.wrapping_add(1);
    }
}

#[derive(Clone, Default)]
pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut new_entries = vec![empty_entry(); new_capacity];
        let mut count = 0;
        for entry in self.entries.drain(..) {
            if let Some(key) = entry.key {
                let slot = probe(&new_entries, entry.hash, |e| e.key == Some(key));
                new_entries[slot] = Entry { key: Some(key), hash: entry.hash, value: entry.value };
                count += 1;
            }
        }
        self.entries = new_entries;
        self.count = count;
    }

    fn ensure_capacity(&mut self) {
        if self.entries.is_empty() {
            self.grow(4);
        } else if (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            self.grow(self.entries.len() * 2);
        }
    }

    /// Inserts or overwrites `key => value`. Returns `true` if this created
    /// a new entry.
    pub fn insert(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        self.ensure_capacity();
        let slot = probe(&self.entries, hash, |e| e.key == Some(key));
        let is_new = self.entries[slot].key.is_none();
        if is_new && matches!(self.entries[slot].value, Value::Unit) {
            self.count += 1;
        }
        self.entries[slot] = Entry { key: Some(key), hash, value };
        is_new
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let slot = probe(&self.entries, hash, |e| e.key == Some(key));
        self.entries[slot].key.map(|_| self.entries[slot].value)
    }

    pub fn contains(&self, key: ObjRef, hash: u32) -> bool {
        self.get(key, hash).is_some()
    }

    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let slot = probe(&self.entries, hash, |e| e.key == Some(key));
        if self.entries[slot].key.is_none() {
            return false;
        }
        self.entries[slot] = Entry { key: None, hash: 0, value: Value::Bool(true) };
        true
    }

    /// Looks up an entry whose key's resolved content matches, without
    /// knowing the `ObjRef` key ahead of time. `content_eq` is handed the
    /// candidate key and must compare its backing string to the one being
    /// searched for.
    pub fn find_by_content(&self, hash: u32, mut content_eq: impl FnMut(ObjRef) -> bool) -> Option<ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let slot = probe(&self.entries, hash, |e| e.hash == hash && content_eq(e.key.expect("matched slot has a key")));
        self.entries[slot].key
    }

    pub fn entries_snapshot(&self) -> Vec<(ObjRef, Value)> {
        self.entries.iter().filter_map(|e| e.key.map(|k| (k, e.value))).collect()
    }

    pub fn keys_snapshot(&self) -> Vec<ObjRef> {
        self.entries.iter().filter_map(|e| e.key).collect()
    }

    /// Drops every entry whose key fails `is_live`, used to evict interned
    /// strings that a collection found unreachable (C5's "sweep interned
    /// strings before the heap sweep").
    pub fn remove_white(&mut self, is_live: impl Fn(ObjRef) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !is_live(key) {
                    *entry = Entry { key: None, hash: 0, value: Value::Bool(true) };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> ObjRef {
        ObjRef::from_index(n as usize)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut table = Table::new();
        assert!(table.insert(key(1), 42, Value::Int(7)));
        assert_eq!(table.get(key(1), 42), Some(Value::Int(7)));
    }

    #[test]
    fn reinserting_same_key_is_not_counted_as_new() {
        let mut table = Table::new();
        assert!(table.insert(key(1), 42, Value::Int(7)));
        assert!(!table.insert(key(1), 42, Value::Int(9)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(key(1), 42), Some(Value::Int(9)));
    }

    #[test]
    fn delete_then_get_returns_none() {
        let mut table = Table::new();
        table.insert(key(1), 42, Value::Int(7));
        assert!(table.delete(key(1), 42));
        assert_eq!(table.get(key(1), 42), None);
    }

    #[test]
    fn grows_past_load_factor_without_losing_entries() {
        let mut table = Table::new();
        for i in 0..100u32 {
            table.insert(key(i), i * 31, Value::Int(i as i64));
        }
        for i in 0..100u32 {
            assert_eq!(table.get(key(i), i * 31), Some(Value::Int(i as i64)));
        }
    }

    #[test]
    fn find_by_content_locates_matching_hash_bucket() {
        let mut table = Table::new();
        table.insert(key(5), 99, Value::Unit);
        let found = table.find_by_content(99, |k| k == key(5));
        assert_eq!(found, Some(key(5)));
        let missing = table.find_by_content(99, |_| false);
        assert_eq!(missing, None);
    }
}

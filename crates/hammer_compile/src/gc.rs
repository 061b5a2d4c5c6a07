//! The object heap and its tracing mark-sweep collector (C4/C6).
//!
//! Objects live in a growable vector of slots addressed by [`ObjRef`]
//! (an index) rather than a pointer-chased intrusive list - freed slots are
//! recycled through a free list instead of being unlinked from a chain.
//! Reachability is tracked with the same tri-colour scheme as the source
//! collector, but the grey worklist is a plain `Vec<ObjRef>` rather than a
//! second intrusive link on the object header (see SPEC_FULL.md's
//! re-architecture notes).
//!
//! Collection cycles emit `tracing` events at `debug`/`trace` level; set
//! `RUST_LOG=hammer_compile=debug` to watch them.

use crate::chunk::Chunk;
use crate::object::{Color, ClosureObj, FunctionObj, NativeFn, NativeObj, Object, ObjRef, ObjString, pjw_hash};
use crate::table::Table;
use crate::value::Value;

enum Slot {
    Occupied { object: Object, color: Color, size: usize },
    Free,
}

pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    pub strings: Table,
    pub globals: Table,
    grey: Vec<ObjRef>,
    bytes_allocated: usize,
    next_gc: usize,
    /// False during the compile phase (I3): no collection may run.
    pub is_active: bool,
    /// When set, every allocation that could grow the heap collects first,
    /// regardless of the byte threshold. Used by tests that want to force
    /// a collection deterministically.
    pub stress: bool,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            strings: Table::new(),
            globals: Table::new(),
            grey: Vec::new(),
            bytes_allocated: 0,
            next_gc: 1024 * 1024,
            is_active: false,
            stress: false,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    fn alloc(&mut self, object: Object) -> ObjRef {
        let size = estimate_size(&object);
        self.bytes_allocated += size;
        let slot = Slot::Occupied { object, color: Color::White, size };
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = slot;
            ObjRef::from_index(index as usize)
        } else {
            self.slots.push(slot);
            ObjRef::from_index(self.slots.len() - 1)
        }
    }

    pub fn get(&self, r: ObjRef) -> &Object {
        match &self.slots[r.index()] {
            Slot::Occupied { object, .. } => object,
            Slot::Free => panic!("dangling ObjRef: object already collected"),
        }
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
        match &mut self.slots[r.index()] {
            Slot::Occupied { object, .. } => object,
            Slot::Free => panic!("dangling ObjRef: object already collected"),
        }
    }

    /// Interns `s`, returning the canonical `ObjRef` for its content.
    /// Repeated calls with textually-equal strings return the same
    /// `ObjRef` (P3/I2).
    pub fn intern(&mut self, s: &str) -> ObjRef {
        let hash = pjw_hash(s.as_bytes());
        if let Some(existing) = self.strings.find_by_content(hash, |key| self.str_chars(key) == s) {
            return existing;
        }
        let r = self.alloc(Object::Str(ObjString { hash, chars: s.to_string() }));
        self.strings.insert(r, hash, Value::Unit);
        r
    }

    fn str_chars(&self, r: ObjRef) -> &str {
        match self.get(r) {
            Object::Str(s) => &s.chars,
            _ => panic!("ObjRef in the string table does not name a string"),
        }
    }

    pub fn new_cell(&mut self, car: Value, cdr: Value) -> ObjRef {
        self.alloc(Object::Cell(car, cdr))
    }

    pub fn new_list(&mut self, items: Vec<Value>) -> ObjRef {
        self.alloc(Object::List(items))
    }

    pub fn new_map(&mut self) -> ObjRef {
        self.alloc(Object::Map(Table::new()))
    }

    pub fn new_function(&mut self, name: Option<ObjRef>, arity: u8, chunk: Chunk) -> ObjRef {
        self.alloc(Object::Function(FunctionObj { name, arity, chunk }))
    }

    pub fn new_native(&mut self, name: &'static str, arity: i32, function: NativeFn) -> ObjRef {
        self.alloc(Object::Native(NativeObj { name, arity, function }))
    }

    pub fn new_closure(&mut self, function: ObjRef, upvalues: Vec<Value>) -> ObjRef {
        self.alloc(Object::Closure(ClosureObj { function, upvalues }))
    }

    pub fn new_composed(&mut self, f: Value, g: Value) -> ObjRef {
        self.alloc(Object::Composed(f, g))
    }

    fn is_white(&self, r: ObjRef) -> bool {
        matches!(&self.slots[r.index()], Slot::Occupied { color: Color::White, .. })
    }

    fn set_color(&mut self, r: ObjRef, color: Color) {
        if let Slot::Occupied { color: c, .. } = &mut self.slots[r.index()] {
            *c = color;
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        if self.is_white(r) {
            self.set_color(r, Color::Grey);
            self.grey.push(r);
        }
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    /// Walks the grey worklist to exhaustion (§4.4 step 2).
    pub fn trace(&mut self) {
        tracing::trace!(before = self.bytes_allocated, "collection starting");
        while let Some(r) = self.grey.pop() {
            self.blacken(r);
        }
    }

    fn blacken(&mut self, r: ObjRef) {
        let children = Children::of(self.get(r));
        match children {
            Children::None => {}
            Children::Values(values) => {
                for v in values {
                    self.mark_value(v);
                }
            }
            Children::Map { keys, values } => {
                for k in keys {
                    self.mark_object(k);
                }
                for v in values {
                    self.mark_value(v);
                }
            }
            Children::Closure { function, upvalues } => {
                self.mark_object(function);
                for v in upvalues {
                    self.mark_value(v);
                }
            }
            Children::Function { name, constants } => {
                if let Some(n) = name {
                    self.mark_object(n);
                }
                for v in constants {
                    self.mark_value(v);
                }
            }
        }
        self.set_color(r, Color::Black);
    }

    /// Evicts interned strings a collection found unreachable (§4.4 step 3)
    /// before the heap sweep reclaims their backing objects.
    pub fn sweep_strings(&mut self) {
        let mut strings = std::mem::take(&mut self.strings);
        strings.remove_white(|r| !self.is_white(r));
        self.strings = strings;
    }

    /// Frees every White object and demotes surviving Black objects back to
    /// White for the next cycle (§4.4 step 4).
    pub fn sweep(&mut self) {
        for i in 0..self.slots.len() {
            let is_white = matches!(&self.slots[i], Slot::Occupied { color: Color::White, .. });
            if is_white {
                let old = std::mem::replace(&mut self.slots[i], Slot::Free);
                if let Slot::Occupied { size, .. } = old {
                    self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
                }
                self.free.push(i as u32);
            } else if let Slot::Occupied { color, .. } = &mut self.slots[i] {
                *color = Color::White;
            }
        }
        tracing::debug!(after = self.bytes_allocated, "collection finished");
    }

    pub fn should_collect(&self) -> bool {
        self.is_active && (self.stress || self.bytes_allocated > self.next_gc)
    }

    pub fn update_threshold(&mut self) {
        self.next_gc = self.bytes_allocated * 2;
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

enum Children {
    None,
    Values(Vec<Value>),
    Map { keys: Vec<ObjRef>, values: Vec<Value> },
    Closure { function: ObjRef, upvalues: Vec<Value> },
    Function { name: Option<ObjRef>, constants: Vec<Value> },
}

impl Children {
    fn of(object: &Object) -> Children {
        match object {
            Object::Str(_) | Object::Native(_) => Children::None,
            Object::Cell(a, b) => Children::Values(vec![*a, *b]),
            Object::List(items) => Children::Values(items.clone()),
            Object::Map(table) => {
                let keys = table.keys_snapshot();
                let values = table.entries_snapshot().into_iter().map(|(_, v)| v).collect();
                Children::Map { keys, values }
            }
            Object::Closure(c) => Children::Closure { function: c.function, upvalues: c.upvalues.clone() },
            Object::Function(f) => Children::Function { name: f.name, constants: f.chunk.constants.values.clone() },
            Object::Composed(f, g) => Children::Values(vec![*f, *g]),
        }
    }
}

fn estimate_size(object: &Object) -> usize {
    use std::mem::size_of;
    match object {
        Object::Str(s) => size_of::<ObjString>() + s.chars.len(),
        Object::Cell(..) => size_of::<(Value, Value)>(),
        Object::Function(f) => size_of::<FunctionObj>() + f.chunk.code.len() + f.chunk.constants.len() * size_of::<Value>(),
        Object::Native(_) => size_of::<NativeObj>(),
        Object::Closure(c) => size_of::<ClosureObj>() + c.upvalues.len() * size_of::<Value>(),
        Object::List(items) => size_of::<Vec<Value>>() + items.len() * size_of::<Value>(),
        Object::Map(t) => size_of::<Table>() + t.len() * size_of::<(ObjRef, Value)>(),
        Object::Composed(..) => size_of::<(Value, Value)>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_the_same_content_returns_the_same_ref() {
        let mut heap = Heap::new();
        let a = heap.intern("abcd");
        let b = heap.intern("abcd");
        assert_eq!(a, b);
    }

    #[test]
    fn interning_different_content_returns_different_refs() {
        let mut heap = Heap::new();
        let a = heap.intern("abcd");
        let b = heap.intern("dcba");
        assert_ne!(a, b);
    }

    #[test]
    fn collection_frees_unreachable_cells() {
        let mut heap = Heap::new();
        heap.is_active = true;
        let reachable = heap.new_cell(Value::Int(1), Value::Unit);
        let _unreachable = heap.new_cell(Value::Int(2), Value::Unit);
        heap.mark_object(reachable);
        heap.trace();
        heap.sweep_strings();
        heap.sweep();
        // Reachable survives and is demoted back to White for the next cycle.
        assert!(matches!(heap.get(reachable), Object::Cell(Value::Int(1), Value::Unit)));
    }

    #[test]
    fn second_collection_without_activity_leaves_no_white_survivors() {
        let mut heap = Heap::new();
        heap.is_active = true;
        let root = heap.new_cell(Value::Int(1), Value::Unit);
        heap.mark_object(root);
        heap.trace();
        heap.sweep_strings();
        heap.sweep();
        // Second cycle: mark the same root again, nothing new allocated.
        heap.mark_object(root);
        heap.trace();
        heap.sweep_strings();
        heap.sweep();
        assert!(matches!(heap.get(root), Object::Cell(..)));
    }

    #[test]
    fn freed_slots_are_recycled() {
        let mut heap = Heap::new();
        heap.is_active = true;
        let _throwaway = heap.new_cell(Value::Unit, Value::Unit);
        heap.trace();
        heap.sweep_strings();
        heap.sweep();
        let reused = heap.new_cell(Value::Int(9), Value::Unit);
        assert!(matches!(heap.get(reused), Object::Cell(Value::Int(9), Value::Unit)));
    }
}

//! Tracked allocations for strings and array storage
//!
//! Every string and every array the interpreter creates lives in one of the
//! arenas owned by [`Heap`]. Nothing is released eagerly: a slot is reclaimed
//! only by the sweep phase of [`crate::gc`], which frees every slot whose
//! liveness mark was not set during the preceding mark phase.
//!
//! Handles ([`StrRef`], [`ArrayRef`], [`NodeId`]) are plain indices. A handle
//! that outlives a collection (because the value it belongs to was not
//! reachable from a global symbol) is stale. Freed slots are reused, so a
//! stale handle may alias whatever was allocated there since; it reads as
//! empty only while its slot stays free. Collection is refused while a
//! macro is suspended, so only values a host keeps outside the symbol table
//! can go stale.

use crate::interp::Value;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

/// Handle to an immutable byte string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrRef(pub(crate) u32);

/// Handle to a sparse array (the header of an ordered tree)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayRef(pub(crate) u32);

/// Handle to one entry of a sparse array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

#[derive(Debug)]
struct Slot<T> {
    item: Option<T>,
    marked: bool,
}

/// Slot arena with a free list and one liveness mark per slot
#[derive(Debug)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    fn alloc(&mut self, item: T) -> u32 {
        self.live += 1;
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Slot {
                item: Some(item),
                marked: false,
            };
            id
        } else {
            self.slots.push(Slot {
                item: Some(item),
                marked: false,
            });
            (self.slots.len() - 1) as u32
        }
    }

    pub(crate) fn get(&self, id: u32) -> Option<&T> {
        self.slots.get(id as usize).and_then(|s| s.item.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.slots.get_mut(id as usize).and_then(|s| s.item.as_mut())
    }

    /// Set the liveness mark of a slot. Returns true only the first time a
    /// slot is marked during a collection.
    pub(crate) fn mark(&mut self, id: u32) -> bool {
        match self.slots.get_mut(id as usize) {
            Some(slot) if slot.item.is_some() && !slot.marked => {
                slot.marked = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.marked = false;
        }
    }

    /// Free every occupied slot that is not marked; returns how many were freed
    pub(crate) fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (id, slot) in self.slots.iter_mut().enumerate() {
            if slot.item.is_some() && !slot.marked {
                slot.item = None;
                self.free.push(id as u32);
                freed += 1;
            }
        }
        self.live -= freed;
        freed
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }
}

impl<T> Index<u32> for Arena<T> {
    type Output = T;

    fn index(&self, id: u32) -> &T {
        match self.get(id) {
            Some(item) => item,
            None => panic!("dangling heap handle {id}"),
        }
    }
}

impl<T> IndexMut<u32> for Arena<T> {
    fn index_mut(&mut self, id: u32) -> &mut T {
        match self.get_mut(id) {
            Some(item) => item,
            None => panic!("dangling heap handle {id}"),
        }
    }
}

/// Root record of one sparse array
#[derive(Debug, Default)]
pub(crate) struct ArrayHeader {
    pub(crate) root: Option<NodeId>,
    pub(crate) len: usize,
}

/// One key/value entry of a sparse array, linked into its tree
#[derive(Debug)]
pub(crate) struct ArrayNode {
    pub(crate) key: StrRef,
    pub(crate) value: Value,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) height: i32,
    /// Cleared when the entry is removed from its tree. Unlinked nodes stay
    /// allocated until the next sweep so that a suspended `for` loop holding
    /// one can tell it is gone.
    pub(crate) linked: bool,
}

/// Live object counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub strings: usize,
    pub arrays: usize,
    pub nodes: usize,
}

/// Owner of every string and array allocation made by macros
#[derive(Debug)]
pub struct Heap {
    pub(crate) strings: Arena<Rc<[u8]>>,
    pub(crate) arrays: Arena<ArrayHeader>,
    pub(crate) nodes: Arena<ArrayNode>,
    allocations: usize,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            strings: Arena::new(),
            arrays: Arena::new(),
            nodes: Arena::new(),
            allocations: 0,
        }
    }

    /// Allocate a tracked copy of `bytes`
    pub fn alloc_string(&mut self, bytes: impl AsRef<[u8]>) -> StrRef {
        self.allocations += 1;
        StrRef(self.strings.alloc(Rc::from(bytes.as_ref())))
    }

    /// Allocate a string and wrap it in a value
    pub fn string_value(&mut self, bytes: impl AsRef<[u8]>) -> Value {
        Value::Str(self.alloc_string(bytes))
    }

    /// Contents of a string; a handle to a free slot reads as empty
    pub fn string(&self, s: StrRef) -> &[u8] {
        self.strings.get(s.0).map(|rc| &rc[..]).unwrap_or(&[])
    }

    /// Shared contents of a string, for comparisons that outlive a borrow
    pub(crate) fn string_rc(&self, s: StrRef) -> Rc<[u8]> {
        self.strings
            .get(s.0)
            .cloned()
            .unwrap_or_else(|| Rc::from(&[][..]))
    }

    /// Allocate an empty sparse array
    pub fn new_array(&mut self) -> ArrayRef {
        self.allocations += 1;
        ArrayRef(self.arrays.alloc(ArrayHeader::default()))
    }

    pub(crate) fn alloc_node(&mut self, node: ArrayNode) -> NodeId {
        self.allocations += 1;
        NodeId(self.nodes.alloc(node))
    }

    /// Number of allocations since the last sweep
    pub fn allocations_since_sweep(&self) -> usize {
        self.allocations
    }

    pub(crate) fn reset_allocation_count(&mut self) {
        self.allocations = 0;
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            strings: self.strings.live(),
            arrays: self.arrays.live(),
            nodes: self.nodes.live(),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

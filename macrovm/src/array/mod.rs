//! Sparse arrays: ordered string-keyed maps stored on the heap
//!
//! Keys compare byte-wise; that order is the iteration order of `for` loops
//! and the order in which the set operators build their results. The
//! operators never modify their inputs.

mod tree;

use crate::heap::{ArrayRef, Heap, NodeId, StrRef};
use crate::interp::{STACK_GROW_SIZE, STACK_RED_ZONE, Value};

/// Separator placed between the subscripts of a multi-dimensional key
pub const ARRAY_DIM_SEP: &[u8] = b"\x1c";

impl ArrayRef {
    /// Insert or replace the entry for `key`. Returns true when a new entry
    /// was created, false when an existing value was replaced.
    pub fn insert(self, heap: &mut Heap, key: StrRef, value: Value) -> bool {
        heap.tree_insert(self, key, value)
    }

    /// Insert under a key given as bytes, allocating the key string
    pub fn insert_bytes(self, heap: &mut Heap, key: &[u8], value: Value) -> bool {
        if let Some(node) = heap.tree_find(self, key) {
            heap.nodes[node.0].value = value;
            return false;
        }
        let key = heap.alloc_string(key);
        heap.tree_insert(self, key, value)
    }

    pub fn find(self, heap: &Heap, key: &[u8]) -> Option<Value> {
        heap.tree_find(self, key).map(|node| heap.nodes[node.0].value)
    }

    pub fn contains(self, heap: &Heap, key: &[u8]) -> bool {
        heap.tree_find(self, key).is_some()
    }

    /// Remove the entry for `key`; returns whether it existed
    pub fn delete(self, heap: &mut Heap, key: &[u8]) -> bool {
        match heap.tree_find(self, key) {
            Some(node) => {
                heap.tree_unlink(self, node);
                true
            }
            None => false,
        }
    }

    pub fn delete_all(self, heap: &mut Heap) {
        while let Some(root) = heap.tree_root(self) {
            heap.tree_unlink(self, root);
        }
    }

    pub fn size(self, heap: &Heap) -> usize {
        heap.arrays.get(self.0).map_or(0, |h| h.len)
    }

    /// Entry with the smallest key
    pub fn first(self, heap: &Heap) -> Option<NodeId> {
        heap.tree_root(self).map(|root| heap.leftmost(root))
    }

    /// Entries in key order
    pub fn entries(self, heap: &Heap) -> Entries<'_> {
        Entries {
            heap,
            next: self.first(heap),
        }
    }

    /// Structural copy; nested arrays are copied too, strings are shared
    pub fn deep_copy(self, heap: &mut Heap) -> ArrayRef {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            let copy = heap.new_array();
            let entries: Vec<(StrRef, Value)> = self.entries(heap).collect();
            for (key, value) in entries {
                let value = match value {
                    Value::Array(inner) => Value::Array(inner.deep_copy(heap)),
                    other => other,
                };
                heap.tree_insert(copy, key, value);
            }
            copy
        })
    }

    /// Keys of both; the right value wins on collision
    pub fn union(self, other: ArrayRef, heap: &mut Heap) -> ArrayRef {
        merge(heap, self, other, MergeRule { left_only: true, right_only: true, both: Some(Side::Right) })
    }

    /// Keys of `self` absent from `other`
    pub fn difference(self, other: ArrayRef, heap: &mut Heap) -> ArrayRef {
        merge(heap, self, other, MergeRule { left_only: true, right_only: false, both: None })
    }

    /// Keys present in both; the right value wins
    pub fn intersection(self, other: ArrayRef, heap: &mut Heap) -> ArrayRef {
        merge(heap, self, other, MergeRule { left_only: false, right_only: false, both: Some(Side::Right) })
    }

    /// Keys of both; the left value wins on collision
    pub fn merge_keep_left(self, other: ArrayRef, heap: &mut Heap) -> ArrayRef {
        merge(heap, self, other, MergeRule { left_only: true, right_only: true, both: Some(Side::Left) })
    }
}

impl NodeId {
    /// Entry following this one in key order. Returns `None` at the end, and
    /// also when this entry has since been deleted from its array.
    pub fn next(self, heap: &Heap) -> Option<NodeId> {
        heap.tree_next(self)
    }

    pub fn key(self, heap: &Heap) -> Option<StrRef> {
        heap.nodes.get(self.0).map(|n| n.key)
    }

    pub fn value(self, heap: &Heap) -> Option<Value> {
        heap.nodes.get(self.0).map(|n| n.value)
    }

    /// Whether the entry is still part of an array
    pub fn is_linked(self, heap: &Heap) -> bool {
        heap.nodes.get(self.0).is_some_and(|n| n.linked)
    }
}

/// In-order iterator over `(key, value)` pairs
pub struct Entries<'h> {
    heap: &'h Heap,
    next: Option<NodeId>,
}

impl Iterator for Entries<'_> {
    type Item = (StrRef, Value);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        self.next = self.heap.tree_next(node);
        let n = &self.heap.nodes[node.0];
        Some((n.key, n.value))
    }
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

struct MergeRule {
    left_only: bool,
    right_only: bool,
    both: Option<Side>,
}

/// Walk both arrays in key order and build a fresh array per `rule`
fn merge(heap: &mut Heap, left: ArrayRef, right: ArrayRef, rule: MergeRule) -> ArrayRef {
    let lhs: Vec<(StrRef, Value)> = left.entries(heap).collect();
    let rhs: Vec<(StrRef, Value)> = right.entries(heap).collect();
    let result = heap.new_array();

    let (mut i, mut j) = (0, 0);
    while i < lhs.len() || j < rhs.len() {
        let order = match (lhs.get(i), rhs.get(j)) {
            (Some(l), Some(r)) => heap.string(l.0).cmp(heap.string(r.0)),
            (Some(_), None) => std::cmp::Ordering::Less,
            _ => std::cmp::Ordering::Greater,
        };
        let picked = match order {
            std::cmp::Ordering::Less => {
                i += 1;
                rule.left_only.then_some(lhs[i - 1])
            }
            std::cmp::Ordering::Greater => {
                j += 1;
                rule.right_only.then_some(rhs[j - 1])
            }
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
                rule.both.map(|side| match side {
                    Side::Left => lhs[i - 1],
                    Side::Right => rhs[j - 1],
                })
            }
        };
        if let Some((key, value)) = picked {
            heap.tree_insert(result, key, value);
        }
    }
    result
}

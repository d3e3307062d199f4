//! Mark/sweep garbage collection
//!
//! The roots are the values of the global symbol table and nothing else.
//! Values held only by a suspended macro's stack or frame are invisible to
//! the mark phase, so collection must not run while any continuation is
//! outstanding. The collector is only reachable through
//! [`crate::Runtime::collect_garbage`] and [`crate::Runtime::maybe_collect`],
//! which both refuse while a continuation exists.

use crate::heap::{ArrayRef, Heap, NodeId};
use crate::interp::{STACK_GROW_SIZE, STACK_RED_ZONE, Value};
use crate::symbol::SymbolTable;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Objects freed and retained by one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GcStats {
    pub strings_freed: usize,
    pub arrays_freed: usize,
    pub nodes_freed: usize,
    pub strings_live: usize,
    pub arrays_live: usize,
    pub nodes_live: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcError {
    #[error("cannot collect garbage while {0} macro(s) are suspended")]
    MacrosSuspended(usize),
}

/// Free every string, array and array entry unreachable from `symbols`
pub(crate) fn collect(heap: &mut Heap, symbols: &SymbolTable) -> GcStats {
    heap.strings.clear_marks();
    heap.arrays.clear_marks();
    heap.nodes.clear_marks();

    for (_, symbol) in symbols.iter() {
        mark_value(heap, symbol.value);
    }

    let strings_freed = heap.strings.sweep();
    let arrays_freed = heap.arrays.sweep();
    let nodes_freed = heap.nodes.sweep();
    heap.reset_allocation_count();

    let live = heap.stats();
    let stats = GcStats {
        strings_freed,
        arrays_freed,
        nodes_freed,
        strings_live: live.strings,
        arrays_live: live.arrays,
        nodes_live: live.nodes,
    };
    debug!(
        strings_freed,
        arrays_freed,
        nodes_freed,
        strings_live = live.strings,
        nodes_live = live.nodes,
        "garbage collected"
    );
    stats
}

fn mark_value(heap: &mut Heap, value: Value) {
    match value {
        Value::Str(s) => {
            heap.strings.mark(s.0);
        }
        Value::Array(a) => mark_array(heap, a),
        Value::Int(_) | Value::NoValue => {}
    }
}

fn mark_array(heap: &mut Heap, array: ArrayRef) {
    if !heap.arrays.mark(array.0) {
        return;
    }
    let Some(root) = heap.arrays.get(array.0).and_then(|h| h.root) else {
        return;
    };
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
        let mut pending: Vec<NodeId> = vec![root];
        while let Some(node) = pending.pop() {
            if !heap.nodes.mark(node.0) {
                continue;
            }
            let Some(entry) = heap.nodes.get(node.0) else {
                continue;
            };
            let (key, value) = (entry.key, entry.value);
            pending.extend(entry.left);
            pending.extend(entry.right);
            heap.strings.mark(key.0);
            mark_value(heap, value);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_strings_are_freed() {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let kept = heap.string_value("kept");
        symbols.define_global("g", kept);
        heap.alloc_string("garbage");

        let stats = collect(&mut heap, &symbols);
        assert_eq!(stats.strings_freed, 1);
        assert_eq!(stats.strings_live, 1);
        assert_eq!(heap.allocations_since_sweep(), 0);
        let Value::Str(s) = kept else { unreachable!() };
        assert_eq!(heap.string(s), b"kept");
    }

    #[test]
    fn test_nested_arrays_survive() {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let outer = heap.new_array();
        let inner = heap.new_array();
        let leaf = heap.string_value("leaf");
        inner.insert_bytes(&mut heap, b"x", leaf);
        outer.insert_bytes(&mut heap, b"inner", Value::Array(inner));
        symbols.define_global("a", Value::Array(outer));

        let scratch = heap.new_array();
        scratch.insert_bytes(&mut heap, b"tmp", Value::Int(1));

        let stats = collect(&mut heap, &symbols);
        assert_eq!(stats.arrays_freed, 1);
        assert_eq!(stats.nodes_freed, 1);
        assert_eq!(stats.arrays_live, 2);
        let Some(Value::Array(found)) = outer.find(&heap, b"inner") else {
            panic!("inner array lost");
        };
        let Some(Value::Str(s)) = found.find(&heap, b"x") else {
            panic!("leaf lost");
        };
        assert_eq!(heap.string(s), b"leaf");
    }

    #[test]
    fn test_deleted_entries_are_reclaimed() {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let a = heap.new_array();
        for key in ["a", "b", "c"] {
            a.insert_bytes(&mut heap, key.as_bytes(), Value::Int(0));
        }
        symbols.define_global("a", Value::Array(a));
        a.delete(&mut heap, b"b");

        let stats = collect(&mut heap, &symbols);
        assert_eq!(stats.nodes_freed, 1);
        assert_eq!(stats.nodes_live, 2);
        assert_eq!(a.size(&heap), 2);
    }
}

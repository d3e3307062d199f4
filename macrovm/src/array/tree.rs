//! Height-balanced (AVL) tree over heap nodes
//!
//! Nodes carry parent links so that an iterator needs nothing but the node
//! it stands on to find its successor. Removal relinks nodes instead of
//! copying keys between them: every surviving entry keeps its `NodeId`, which
//! is what lets a `for` loop survive deletions elsewhere in the array.

use crate::heap::{ArrayNode, ArrayRef, Heap, NodeId, StrRef};
use crate::interp::Value;
use std::cmp::Ordering;

impl Heap {
    pub(crate) fn tree_root(&self, array: ArrayRef) -> Option<NodeId> {
        self.arrays.get(array.0).and_then(|h| h.root)
    }

    fn height(&self, node: Option<NodeId>) -> i32 {
        node.map_or(0, |n| self.nodes[n.0].height)
    }

    fn fix_height(&mut self, node: NodeId) {
        let left = self.height(self.nodes[node.0].left);
        let right = self.height(self.nodes[node.0].right);
        self.nodes[node.0].height = 1 + left.max(right);
    }

    fn balance_factor(&self, node: NodeId) -> i32 {
        let n = &self.nodes[node.0];
        self.height(n.left) - self.height(n.right)
    }

    fn replace_child(
        &mut self,
        array: ArrayRef,
        parent: Option<NodeId>,
        old: NodeId,
        new: Option<NodeId>,
    ) {
        match parent {
            None => self.arrays[array.0].root = new,
            Some(p) => {
                let p = &mut self.nodes[p.0];
                if p.left == Some(old) {
                    p.left = new;
                } else {
                    p.right = new;
                }
            }
        }
    }

    fn rotate_left(&mut self, array: ArrayRef, x: NodeId) -> NodeId {
        let Some(y) = self.nodes[x.0].right else {
            return x;
        };
        let inner = self.nodes[y.0].left;
        let parent = self.nodes[x.0].parent;

        self.nodes[x.0].right = inner;
        if let Some(inner) = inner {
            self.nodes[inner.0].parent = Some(x);
        }
        self.nodes[y.0].left = Some(x);
        self.nodes[y.0].parent = parent;
        self.nodes[x.0].parent = Some(y);
        self.replace_child(array, parent, x, Some(y));

        self.fix_height(x);
        self.fix_height(y);
        y
    }

    fn rotate_right(&mut self, array: ArrayRef, x: NodeId) -> NodeId {
        let Some(y) = self.nodes[x.0].left else {
            return x;
        };
        let inner = self.nodes[y.0].right;
        let parent = self.nodes[x.0].parent;

        self.nodes[x.0].left = inner;
        if let Some(inner) = inner {
            self.nodes[inner.0].parent = Some(x);
        }
        self.nodes[y.0].right = Some(x);
        self.nodes[y.0].parent = parent;
        self.nodes[x.0].parent = Some(y);
        self.replace_child(array, parent, x, Some(y));

        self.fix_height(x);
        self.fix_height(y);
        y
    }

    /// Restore heights and balance from `start` up to the root
    fn rebalance(&mut self, array: ArrayRef, start: Option<NodeId>) {
        let mut cur = start;
        while let Some(node) = cur {
            self.fix_height(node);
            let bf = self.balance_factor(node);
            let top = if bf > 1 {
                if let Some(left) = self.nodes[node.0].left {
                    if self.balance_factor(left) < 0 {
                        self.rotate_left(array, left);
                    }
                }
                self.rotate_right(array, node)
            } else if bf < -1 {
                if let Some(right) = self.nodes[node.0].right {
                    if self.balance_factor(right) > 0 {
                        self.rotate_right(array, right);
                    }
                }
                self.rotate_left(array, node)
            } else {
                node
            };
            cur = self.nodes[top.0].parent;
        }
    }

    pub(crate) fn tree_find(&self, array: ArrayRef, key: &[u8]) -> Option<NodeId> {
        let mut cur = self.tree_root(array);
        while let Some(node) = cur {
            let n = &self.nodes[node.0];
            cur = match key.cmp(self.string(n.key)) {
                Ordering::Less => n.left,
                Ordering::Greater => n.right,
                Ordering::Equal => return Some(node),
            };
        }
        None
    }

    /// Insert or replace; returns true when a new entry was created
    pub(crate) fn tree_insert(&mut self, array: ArrayRef, key: StrRef, value: Value) -> bool {
        if self.arrays.get(array.0).is_none() {
            return false;
        }
        let key_bytes = self.string_rc(key);
        let mut parent = None;
        let mut go_left = false;
        let mut cur = self.tree_root(array);
        while let Some(node) = cur {
            let n = &self.nodes[node.0];
            match key_bytes[..].cmp(self.string(n.key)) {
                Ordering::Less => {
                    parent = Some(node);
                    go_left = true;
                    cur = n.left;
                }
                Ordering::Greater => {
                    parent = Some(node);
                    go_left = false;
                    cur = n.right;
                }
                Ordering::Equal => {
                    self.nodes[node.0].value = value;
                    return false;
                }
            }
        }

        let node = self.alloc_node(ArrayNode {
            key,
            value,
            left: None,
            right: None,
            parent,
            height: 1,
            linked: true,
        });
        match parent {
            None => self.arrays[array.0].root = Some(node),
            Some(p) if go_left => self.nodes[p.0].left = Some(node),
            Some(p) => self.nodes[p.0].right = Some(node),
        }
        self.arrays[array.0].len += 1;
        self.rebalance(array, parent);
        true
    }

    fn transplant(&mut self, array: ArrayRef, old: NodeId, new: Option<NodeId>) {
        let parent = self.nodes[old.0].parent;
        self.replace_child(array, parent, old, new);
        if let Some(new) = new {
            self.nodes[new.0].parent = parent;
        }
    }

    pub(crate) fn leftmost(&self, mut node: NodeId) -> NodeId {
        while let Some(left) = self.nodes[node.0].left {
            node = left;
        }
        node
    }

    /// Remove `z` from its tree and mark it unlinked
    pub(crate) fn tree_unlink(&mut self, array: ArrayRef, z: NodeId) {
        let (left, right, parent) = {
            let n = &self.nodes[z.0];
            (n.left, n.right, n.parent)
        };
        let start = match (left, right) {
            (None, _) => {
                self.transplant(array, z, right);
                parent
            }
            (_, None) => {
                self.transplant(array, z, left);
                parent
            }
            (Some(l), Some(r)) => {
                let y = self.leftmost(r);
                let start = if self.nodes[y.0].parent != Some(z) {
                    let start = self.nodes[y.0].parent;
                    let y_right = self.nodes[y.0].right;
                    self.transplant(array, y, y_right);
                    self.nodes[y.0].right = Some(r);
                    self.nodes[r.0].parent = Some(y);
                    start
                } else {
                    Some(y)
                };
                self.transplant(array, z, Some(y));
                self.nodes[y.0].left = Some(l);
                self.nodes[l.0].parent = Some(y);
                self.nodes[y.0].height = self.nodes[z.0].height;
                start
            }
        };

        let n = &mut self.nodes[z.0];
        n.linked = false;
        n.left = None;
        n.right = None;
        n.parent = None;
        self.arrays[array.0].len -= 1;
        self.rebalance(array, start);
    }

    /// In-order successor; `None` at the end or when `node` was unlinked
    pub(crate) fn tree_next(&self, node: NodeId) -> Option<NodeId> {
        match self.nodes.get(node.0) {
            Some(n) if n.linked => {
                if let Some(right) = n.right {
                    return Some(self.leftmost(right));
                }
            }
            _ => return None,
        }
        let mut cur = node;
        let mut parent = self.nodes[node.0].parent;
        while let Some(p) = parent {
            if self.nodes[p.0].right != Some(cur) {
                break;
            }
            cur = p;
            parent = self.nodes[p.0].parent;
        }
        parent
    }
}

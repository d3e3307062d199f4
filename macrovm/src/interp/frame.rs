//! Call frames

use super::value::Value;
use crate::heap::{ArrayRef, NodeId};
use crate::program::Program;
use std::ops::Range;
use std::rc::Rc;

/// Stack slots charged for the linkage of every frame: return address,
/// saved frame, argument count and the argument-array cache
pub const FRAME_LINKAGE_SLOTS: usize = 4;

/// Where execution continues when a frame returns
#[derive(Debug)]
pub struct ReturnAddress {
    pub program: Rc<Program>,
    pub pc: usize,
}

/// One active macro invocation
#[derive(Debug)]
pub struct Frame {
    /// `None` for the outermost frame: returning from it ends the run
    pub return_to: Option<ReturnAddress>,
    /// Argument values on the value stack
    pub args: Range<usize>,
    /// Lazily built `$args` array
    pub arg_array: Option<ArrayRef>,
    pub locals: Vec<Value>,
    /// Positions of `for` loops in progress, keyed by local slot
    cursors: Vec<(usize, Option<NodeId>)>,
}

impl Frame {
    pub fn new(return_to: Option<ReturnAddress>, args: Range<usize>, n_locals: usize) -> Self {
        Frame {
            return_to,
            args,
            arg_array: None,
            locals: vec![Value::NoValue; n_locals],
            cursors: Vec::new(),
        }
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Lowest stack index this frame may pop to
    pub fn base(&self) -> usize {
        self.args.end
    }

    /// Stack slots this frame occupies beyond its arguments
    pub fn footprint(&self) -> usize {
        FRAME_LINKAGE_SLOTS + self.locals.len()
    }

    pub fn set_cursor(&mut self, slot: usize, node: Option<NodeId>) {
        match self.cursors.iter_mut().find(|(s, _)| *s == slot) {
            Some(entry) => entry.1 = node,
            None => self.cursors.push((slot, node)),
        }
    }

    /// Cursor of the loop using `slot`; `None` if the loop never started
    pub fn cursor(&self, slot: usize) -> Option<Option<NodeId>> {
        self.cursors.iter().find(|(s, _)| *s == slot).map(|(_, n)| *n)
    }
}

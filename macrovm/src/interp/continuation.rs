//! Suspended macro executions

use super::engine::Engine;
use super::native::DocumentId;
use super::value::Value;
use crate::program::Program;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Counts a continuation as outstanding for as long as it lives
struct SuspendToken(Rc<Cell<usize>>);

impl SuspendToken {
    fn new(counter: &Rc<Cell<usize>>) -> Self {
        counter.set(counter.get() + 1);
        SuspendToken(Rc::clone(counter))
    }
}

impl Drop for SuspendToken {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// A macro suspended at a time-slice boundary or by a native preemption
/// request
///
/// Resume it with [`crate::Runtime::resume`]. Dropping it abandons the run
/// and releases its stack.
pub struct Continuation {
    engine: Engine,
    _token: SuspendToken,
}

impl Continuation {
    pub(crate) fn save(engine: Engine, counter: &Rc<Cell<usize>>) -> Self {
        Continuation {
            engine,
            _token: SuspendToken::new(counter),
        }
    }

    pub(crate) fn restore(self) -> Engine {
        self.engine
    }

    /// Overwrite the result of the native call that requested preemption
    ///
    /// Returns `false` if the continuation did not stop right after a call
    /// whose result is used, in which case nothing changes.
    pub fn modify_pending_return_value(&mut self, value: Value) -> bool {
        self.engine.replace_pending_return(value)
    }

    pub fn run_document(&self) -> DocumentId {
        self.engine.run_document()
    }

    pub fn focus_document(&self) -> DocumentId {
        self.engine.focus_document()
    }

    pub fn set_focus_document(&mut self, document: DocumentId) {
        self.engine.set_focus_document(document);
    }

    /// Program the macro will continue in
    pub fn program(&self) -> &Rc<Program> {
        self.engine.program()
    }

    pub fn pc(&self) -> usize {
        self.engine.pc()
    }

    pub fn stack_depth(&self) -> usize {
        self.engine.stack_depth()
    }

    pub fn call_depth(&self) -> usize {
        self.engine.call_depth()
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("pc", &self.pc())
            .field("stack_depth", &self.stack_depth())
            .field("call_depth", &self.call_depth())
            .field("run_document", &self.run_document())
            .finish()
    }
}

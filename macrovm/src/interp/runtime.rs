//! Process-wide interpreter state and the host entry points

use super::continuation::Continuation;
use super::engine::{Engine, Globals, Slice};
use super::error::RuntimeError;
use super::native::{DocumentId, register_builtins};
use super::value::Value;
use crate::asm::{self, Assembly};
use crate::config::EngineConfig;
use crate::error::AsmError;
use crate::gc::{self, GcError, GcStats};
use crate::heap::Heap;
use crate::program::Program;
use crate::symbol::SymbolTable;
use std::cell::Cell;
use std::rc::Rc;
use tracing::debug;

/// How a time slice ended
#[derive(Debug)]
pub enum Exec {
    /// The outermost macro returned; `NoValue` if it returned nothing
    Done(Value),
    /// The run was aborted. Side effects made so far stand.
    Error(RuntimeError),
    /// The quantum was used up
    TimeLimit(Continuation),
    /// A native function asked to suspend
    Preempted(Continuation),
}

impl Exec {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Exec::TimeLimit(_) | Exec::Preempted(_))
    }
}

/// Heap, global symbols and output shared by every macro run
pub struct Runtime {
    pub heap: Heap,
    pub symbols: SymbolTable,
    config: EngineConfig,
    suspended: Rc<Cell<usize>>,
    output: Vec<u8>,
}

impl Runtime {
    /// Runtime with the default configuration and the built-in library
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let mut symbols = SymbolTable::new();
        register_builtins(&mut symbols);
        Runtime {
            heap: Heap::new(),
            symbols,
            config,
            suspended: Rc::new(Cell::new(0)),
            output: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Assemble a listing against this runtime's symbols and heap
    pub fn assemble(&mut self, source: &str) -> Result<Assembly, AsmError> {
        asm::assemble(
            source,
            &mut self.symbols,
            &mut self.heap,
            self.config.program_capacity,
        )
    }

    /// Start `program` with `args` in `document` and run its first slice
    pub fn execute(&mut self, program: &Rc<Program>, args: Vec<Value>, document: DocumentId) -> Exec {
        debug!(%document, n_args = args.len(), "execute");
        match Engine::new(Rc::clone(program), args, document, self.config.stack_size) {
            Ok(engine) => self.run_slice(engine),
            Err(e) => Exec::Error(e),
        }
    }

    /// Run the next slice of a suspended macro
    pub fn resume(&mut self, continuation: Continuation) -> Exec {
        debug!(pc = continuation.pc(), depth = continuation.stack_depth(), "resume");
        self.run_slice(continuation.restore())
    }

    /// Resume until the macro finishes; preempted calls keep whatever
    /// value they returned
    pub fn complete(&mut self, mut exec: Exec) -> Result<Value, RuntimeError> {
        loop {
            exec = match exec {
                Exec::Done(value) => return Ok(value),
                Exec::Error(e) => return Err(e),
                Exec::TimeLimit(k) | Exec::Preempted(k) => self.resume(k),
            };
        }
    }

    /// [`Runtime::execute`] followed by [`Runtime::complete`]
    pub fn run_to_completion(
        &mut self,
        program: &Rc<Program>,
        args: Vec<Value>,
        document: DocumentId,
    ) -> Result<Value, RuntimeError> {
        let exec = self.execute(program, args, document);
        self.complete(exec)
    }

    fn run_slice(&mut self, mut engine: Engine) -> Exec {
        let mut globals = Globals {
            heap: &mut self.heap,
            symbols: &mut self.symbols,
            output: &mut self.output,
        };
        match engine.run(&mut globals, self.config.quantum) {
            Ok(Slice::Done(value)) => Exec::Done(value),
            Ok(Slice::TimeLimit) => {
                debug!(pc = engine.pc(), "time limit");
                Exec::TimeLimit(Continuation::save(engine, &self.suspended))
            }
            Ok(Slice::Preempted) => {
                debug!(pc = engine.pc(), "preempted");
                Exec::Preempted(Continuation::save(engine, &self.suspended))
            }
            Err(e) => {
                debug!(pc = engine.pc(), error = %e, "macro failed");
                Exec::Error(e)
            }
        }
    }

    /// Continuations alive anywhere in the process
    pub fn suspended_count(&self) -> usize {
        self.suspended.get()
    }

    /// Collect now; refused while any macro is suspended
    pub fn collect_garbage(&mut self) -> Result<GcStats, GcError> {
        match self.suspended.get() {
            0 => Ok(gc::collect(&mut self.heap, &self.symbols)),
            n => Err(GcError::MacrosSuspended(n)),
        }
    }

    /// Collect if nothing is suspended and enough has been allocated
    pub fn maybe_collect(&mut self) -> Option<GcStats> {
        if self.heap.allocations_since_sweep() < self.config.gc_threshold {
            return None;
        }
        self.collect_garbage().ok()
    }

    /// Drain what natives have written so far
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

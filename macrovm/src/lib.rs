//! macrovm library
//!
//! Stack-based bytecode virtual machine for editor automation macros:
//! programs, an interpreter with cooperative preemption, sparse arrays and
//! a mark/sweep collector for the string and array heap.

pub mod array;
pub mod asm;
pub mod config;
pub mod error;
pub mod gc;
pub mod heap;
pub mod interp;
pub mod lexer;
pub mod program;
pub mod span;
pub mod symbol;

pub use asm::{Assembly, assemble};
pub use config::{ConfigError, EngineConfig};
pub use error::{AsmError, Result};
pub use gc::{GcError, GcStats};
pub use heap::{ArrayRef, Heap, StrRef};
pub use interp::{Continuation, DocumentId, ErrorKind, Exec, NativeContext, Runtime, RuntimeError, Value};
pub use program::{Opcode, Program, ProgramBuilder};
pub use span::Span;
pub use symbol::{StorageClass, SymbolRef, SymbolTable};

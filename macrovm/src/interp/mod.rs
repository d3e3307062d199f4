//! Bytecode interpreter
//!
//! [`Runtime`] owns the process-wide state (heap, global symbols, output),
//! starts macros and resumes their [`Continuation`]s. The per-run state
//! lives in an engine that a continuation carries between time slices.

mod continuation;
mod engine;
mod error;
mod frame;
mod native;
mod runtime;
mod value;

pub use continuation::Continuation;
pub use error::{ErrorKind, InterpResult, RuntimeError};
pub use frame::FRAME_LINKAGE_SLOTS;
pub use native::{DocumentId, NativeContext, register_builtins};
pub use runtime::{Exec, Runtime};
pub use value::{Value, string_to_num};

/// Stack headroom below which recursive heap walks grow the native stack
pub const STACK_RED_ZONE: usize = 128 * 1024;
pub const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

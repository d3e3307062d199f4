//! Native-function calling context and the built-in library
//!
//! A native function receives its arguments as a slice and a
//! [`NativeContext`] giving access to the heap, the document the macro runs
//! in, and the two side channels the engine reads after the call returns:
//! a preemption request and a subroutine to run next.

use super::value::Value;
use crate::array::ARRAY_DIM_SEP;
use crate::heap::Heap;
use crate::program::Program;
use crate::symbol::SymbolTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Host document (window, buffer) a macro is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

pub struct NativeContext<'a> {
    pub heap: &'a mut Heap,
    pub symbols: &'a SymbolTable,
    output: &'a mut Vec<u8>,
    run_document: DocumentId,
    focus_document: DocumentId,
    preempt: bool,
    subroutine: Option<Rc<Program>>,
}

impl<'a> NativeContext<'a> {
    pub(crate) fn new(
        heap: &'a mut Heap,
        symbols: &'a SymbolTable,
        output: &'a mut Vec<u8>,
        run_document: DocumentId,
        focus_document: DocumentId,
    ) -> Self {
        NativeContext {
            heap,
            symbols,
            output,
            run_document,
            focus_document,
            preempt: false,
            subroutine: None,
        }
    }

    /// Document the macro was started from
    pub fn run_document(&self) -> DocumentId {
        self.run_document
    }

    /// Document that editing subroutines act on
    pub fn focus_document(&self) -> DocumentId {
        self.focus_document
    }

    pub fn set_focus_document(&mut self, document: DocumentId) {
        self.focus_document = document;
    }

    /// Suspend the macro once this call returns. The host resumes it later,
    /// usually after [`crate::Continuation::modify_pending_return_value`].
    pub fn request_preempt(&mut self) {
        self.preempt = true;
    }

    /// Run `program` in the calling macro's context, as a call with no
    /// arguments whose return value is discarded
    pub fn run_as_subroutine(&mut self, program: Rc<Program>) {
        self.subroutine = Some(program);
    }

    /// Append to the runtime's output buffer
    pub fn write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    pub(crate) fn preempt_requested(&self) -> bool {
        self.preempt
    }

    pub(crate) fn take_subroutine(&mut self) -> Option<Rc<Program>> {
        self.subroutine.take()
    }
}

const WRONG_N_ARGS: &str = "Wrong number of arguments to function %s";

fn bytes_of(ctx: &NativeContext<'_>, value: &Value) -> Result<Vec<u8>, String> {
    value
        .to_bytes(&*ctx.heap)
        .map(|b| b.into_owned())
        .map_err(|e| e.message)
}

fn int_of(ctx: &NativeContext<'_>, value: &Value) -> Result<i64, String> {
    value.to_integer(&*ctx.heap).map_err(|e| e.message)
}

/// `print(a, b, ...)`: write the string forms of the arguments
fn print(ctx: &mut NativeContext<'_>, args: &[Value]) -> Result<Value, String> {
    for arg in args {
        let bytes = bytes_of(ctx, arg)?;
        ctx.write(&bytes);
    }
    ctx.write(b"\n");
    Ok(Value::NoValue)
}

/// `length(s)`: byte length of a string
fn length(ctx: &mut NativeContext<'_>, args: &[Value]) -> Result<Value, String> {
    let [arg] = args else {
        return Err(WRONG_N_ARGS.to_string());
    };
    Ok(Value::Int(bytes_of(ctx, arg)?.len() as i64))
}

fn min(ctx: &mut NativeContext<'_>, args: &[Value]) -> Result<Value, String> {
    fold_ints(ctx, args, i64::min)
}

fn max(ctx: &mut NativeContext<'_>, args: &[Value]) -> Result<Value, String> {
    fold_ints(ctx, args, i64::max)
}

fn fold_ints(ctx: &NativeContext<'_>, args: &[Value], f: fn(i64, i64) -> i64) -> Result<Value, String> {
    if args.len() < 2 {
        return Err(WRONG_N_ARGS.to_string());
    }
    let mut acc = int_of(ctx, &args[0])?;
    for arg in &args[1..] {
        acc = f(acc, int_of(ctx, arg)?);
    }
    Ok(Value::Int(acc))
}

/// `substring(s, start[, end])` with byte offsets; negative offsets count
/// from the end
fn substring(ctx: &mut NativeContext<'_>, args: &[Value]) -> Result<Value, String> {
    if !(2..=3).contains(&args.len()) {
        return Err(WRONG_N_ARGS.to_string());
    }
    let s = bytes_of(ctx, &args[0])?;
    let len = s.len() as i64;
    let clamp = |n: i64| {
        let n = if n < 0 { (len + n).max(0) } else { n.min(len) };
        n as usize
    };
    let start = clamp(int_of(ctx, &args[1])?);
    let end = match args.get(2) {
        Some(v) => clamp(int_of(ctx, v)?),
        None => s.len(),
    };
    let out = if start < end { &s[start..end] } else { &[][..] };
    Ok(ctx.heap.string_value(out))
}

/// `focus_document(n)`: direct later editing calls at document `n`
fn focus_document(ctx: &mut NativeContext<'_>, args: &[Value]) -> Result<Value, String> {
    let [arg] = args else {
        return Err(WRONG_N_ARGS.to_string());
    };
    let id = int_of(ctx, arg)?;
    let previous = ctx.focus_document();
    ctx.set_focus_document(DocumentId(id as u64));
    Ok(Value::Int(previous.0 as i64))
}

/// `$sub_sep`: the multi-dimensional key separator
fn sub_sep(ctx: &mut NativeContext<'_>, _args: &[Value]) -> Result<Value, String> {
    Ok(ctx.heap.string_value(ARRAY_DIM_SEP))
}

/// `$empty_array`: a fresh array
fn empty_array(ctx: &mut NativeContext<'_>, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::Array(ctx.heap.new_array()))
}

/// `$run_document`: id of the document the macro runs in
fn run_document(ctx: &mut NativeContext<'_>, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::Int(ctx.run_document().0 as i64))
}

/// Install the built-in natives and computed values
pub fn register_builtins(symbols: &mut SymbolTable) {
    symbols.define_native("print", print);
    symbols.define_native("length", length);
    symbols.define_native("min", min);
    symbols.define_native("max", max);
    symbols.define_native("substring", substring);
    symbols.define_native("focus_document", focus_document);
    symbols.define_computed("$sub_sep", sub_sep);
    symbols.define_computed("$empty_array", empty_array);
    symbols.define_computed("$run_document", run_document);
}

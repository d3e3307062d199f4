//! Instruction dispatch and the calling convention
//!
//! An [`Engine`] owns everything that changes while one macro runs: the
//! value stack, the active frame and its callers, the program counter and
//! the documents the macro is bound to. Globals and the heap are shared and
//! passed in for each time slice.

use super::error::{InterpResult, RuntimeError};
use super::frame::{Frame, ReturnAddress};
use super::native::{DocumentId, NativeContext};
use super::value::{Value, string_to_num};
use crate::array::ARRAY_DIM_SEP;
use crate::heap::{ArrayRef, Heap};
use crate::program::{Inst, Opcode, Program};
use crate::symbol::{ArgIndex, NativeFn, StorageClass, SymbolRef, SymbolTable};
use std::rc::Rc;
use tracing::{debug, trace};

/// Shared state an engine runs against
pub(crate) struct Globals<'a> {
    pub heap: &'a mut Heap,
    pub symbols: &'a mut SymbolTable,
    pub output: &'a mut Vec<u8>,
}

/// Result of one instruction
enum Status {
    Ok,
    Preempt,
    Done(Value),
}

/// Why a time slice ended
pub(crate) enum Slice {
    Done(Value),
    TimeLimit,
    Preempted,
}

struct NativeOutcome {
    result: Result<Value, String>,
    preempt: bool,
    subroutine: Option<Rc<Program>>,
}

#[derive(Debug)]
pub struct Engine {
    program: Rc<Program>,
    pc: usize,
    stack: Vec<Value>,
    frame: Frame,
    callers: Vec<Frame>,
    /// Stack slots charged for frame linkage and locals
    frame_slots: usize,
    stack_limit: usize,
    run_document: DocumentId,
    focus_document: DocumentId,
}

impl Engine {
    /// Set up the outermost frame of `program` with `args`
    pub fn new(
        program: Rc<Program>,
        args: Vec<Value>,
        document: DocumentId,
        stack_limit: usize,
    ) -> InterpResult<Self> {
        let frame = Frame::new(None, 0..args.len(), program.locals().len());
        if args.len() + frame.footprint() > stack_limit {
            return Err(RuntimeError::stack_overflow());
        }
        Ok(Engine {
            frame_slots: frame.footprint(),
            program,
            pc: 0,
            stack: args,
            frame,
            callers: Vec::new(),
            stack_limit,
            run_document: document,
            focus_document: document,
        })
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn program(&self) -> &Rc<Program> {
        &self.program
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Number of macro frames above the outermost one
    pub fn call_depth(&self) -> usize {
        self.callers.len()
    }

    pub fn run_document(&self) -> DocumentId {
        self.run_document
    }

    pub fn focus_document(&self) -> DocumentId {
        self.focus_document
    }

    pub(crate) fn set_focus_document(&mut self, document: DocumentId) {
        self.focus_document = document;
    }

    /// Replace the value pushed by a native call that preempted, provided
    /// execution stopped right after its `fetch_ret_val`
    pub(crate) fn replace_pending_return(&mut self, value: Value) -> bool {
        let pending = self
            .pc
            .checked_sub(1)
            .and_then(|at| self.program.code().get(at))
            == Some(&Inst::Op(Opcode::FetchRetVal));
        match self.stack.last_mut() {
            Some(top) if pending => {
                *top = value;
                true
            }
            _ => false,
        }
    }

    /// Execute up to `quantum` instructions
    pub(crate) fn run(&mut self, g: &mut Globals<'_>, quantum: usize) -> InterpResult<Slice> {
        let quantum = quantum.max(1);
        let mut executed = 0;
        loop {
            match self.step(g)? {
                Status::Ok => {
                    executed += 1;
                    if executed >= quantum {
                        return Ok(Slice::TimeLimit);
                    }
                }
                Status::Preempt => return Ok(Slice::Preempted),
                Status::Done(value) => return Ok(Slice::Done(value)),
            }
        }
    }

    fn step(&mut self, g: &mut Globals<'_>) -> InterpResult<Status> {
        let at = self.pc;
        let op = match self.fetch()? {
            Inst::Op(op) => op,
            other => {
                return Err(RuntimeError::internal(format!(
                    "operand {other:?} executed as an instruction at {at}"
                )));
            }
        };
        trace!(pc = at, %op, depth = self.stack.len(), "dispatch");

        match op {
            Opcode::ReturnNoVal => return self.return_from_frame(g, false),
            Opcode::Return => return self.return_from_frame(g, true),
            Opcode::SubrCall => return self.call_subroutine(g),
            Opcode::FetchRetVal => return Err(RuntimeError::internal("internal error: frv")),

            Opcode::PushSym => {
                let sym = self.fetch_sym()?;
                let value = self.read_symbol(g, sym)?;
                self.push(value)?;
            }
            Opcode::Dup => {
                let value = self.peek(0)?;
                self.push(value)?;
            }
            Opcode::Assign => self.assign(g)?,

            Opcode::Add => self.array_or_int(g, ArrayRef::union, |a, b| Ok(a.wrapping_add(b)))?,
            Opcode::Sub => {
                self.array_or_int(g, ArrayRef::difference, |a, b| Ok(a.wrapping_sub(b)))?
            }
            Opcode::BitAnd => self.array_or_int(g, ArrayRef::intersection, |a, b| Ok(a & b))?,
            Opcode::BitOr => self.array_or_int(g, ArrayRef::merge_keep_left, |a, b| Ok(a | b))?,
            Opcode::Mul => self.binary_int(g, |a, b| Ok(a.wrapping_mul(b)))?,
            Opcode::Div => self.binary_int(g, |a, b| {
                if b == 0 {
                    Err(RuntimeError::division_by_zero())
                } else {
                    Ok(a.wrapping_div(b))
                }
            })?,
            Opcode::Mod => self.binary_int(g, |a, b| {
                if b == 0 {
                    Err(RuntimeError::modulo_by_zero())
                } else {
                    Ok(a.wrapping_rem(b))
                }
            })?,
            Opcode::Power => self.binary_int(g, power)?,
            Opcode::Gt => self.binary_int(g, |a, b| Ok(i64::from(a > b)))?,
            Opcode::Lt => self.binary_int(g, |a, b| Ok(i64::from(a < b)))?,
            Opcode::Ge => self.binary_int(g, |a, b| Ok(i64::from(a >= b)))?,
            Opcode::Le => self.binary_int(g, |a, b| Ok(i64::from(a <= b)))?,
            Opcode::And => self.binary_int(g, |a, b| Ok(i64::from(a != 0 && b != 0)))?,
            Opcode::Or => self.binary_int(g, |a, b| Ok(i64::from(a != 0 || b != 0)))?,
            Opcode::Negate => self.unary_int(g, i64::wrapping_neg)?,
            Opcode::Incr => self.unary_int(g, |n| n.wrapping_add(1))?,
            Opcode::Decr => self.unary_int(g, |n| n.wrapping_sub(1))?,
            Opcode::Not => self.unary_int(g, |n| i64::from(n == 0))?,
            Opcode::Eq => {
                let eq = self.equal(g.heap)?;
                self.push(Value::Int(i64::from(eq)))?;
            }
            Opcode::Ne => {
                let eq = self.equal(g.heap)?;
                self.push(Value::Int(i64::from(!eq)))?;
            }
            Opcode::Concat => self.concat(g.heap)?,

            Opcode::Branch => self.pc = self.fetch_branch()?,
            Opcode::BranchTrue | Opcode::BranchFalse => {
                let cond = self.pop()?.to_integer(g.heap)? != 0;
                let target = self.fetch_branch()?;
                if cond == (op == Opcode::BranchTrue) {
                    self.pc = target;
                }
            }
            Opcode::BranchNever => {
                self.fetch_branch()?;
            }

            Opcode::ArrayRef => self.array_ref(g.heap)?,
            Opcode::ArrayAssign => self.array_assign(g.heap)?,
            Opcode::ArrayRefAssignSetup => self.array_ref_assign_setup(g.heap)?,
            Opcode::BeginArrayIter => self.begin_array_iter(g)?,
            Opcode::ArrayIter => self.array_iter(g)?,
            Opcode::InArray => self.in_array(g.heap)?,
            Opcode::ArrayDelete => self.array_delete(g.heap)?,
            Opcode::PushArraySym => self.push_array_sym(g)?,

            Opcode::PushArg => {
                let n = self.pop()?.to_integer(g.heap)?;
                let value = n
                    .checked_sub(1)
                    .and_then(|i| usize::try_from(i).ok())
                    .filter(|&i| i < self.frame.arg_count())
                    .map(|i| self.stack[self.frame.args.start + i])
                    .ok_or_else(|| RuntimeError::undefined_argument(&format!("$args[{n}]")))?;
                self.push(value)?;
            }
            Opcode::PushArgCount => {
                let count = self.frame.arg_count() as i64;
                self.push(Value::Int(count))?;
            }
            Opcode::PushArgArray => {
                let array = self.arg_array(g.heap);
                self.push(Value::Array(array))?;
            }
        }
        Ok(Status::Ok)
    }

    // ---- operand fetch ----

    fn fetch(&mut self) -> InterpResult<Inst> {
        let inst = self
            .program
            .code()
            .get(self.pc)
            .copied()
            .ok_or_else(|| RuntimeError::internal(format!("program counter {} out of range", self.pc)))?;
        self.pc += 1;
        Ok(inst)
    }

    fn fetch_sym(&mut self) -> InterpResult<SymbolRef> {
        match self.fetch()? {
            Inst::Sym(sym) => Ok(sym),
            other => Err(RuntimeError::internal(format!("expected symbol operand, found {other:?}"))),
        }
    }

    fn fetch_imm(&mut self) -> InterpResult<i64> {
        match self.fetch()? {
            Inst::Imm(n) => Ok(n),
            other => Err(RuntimeError::internal(format!("expected immediate operand, found {other:?}"))),
        }
    }

    /// Immediate operand used as a count
    fn fetch_count(&mut self) -> InterpResult<usize> {
        let n = self.fetch_imm()?;
        usize::try_from(n).map_err(|_| RuntimeError::internal(format!("negative count {n}")))
    }

    /// Branch operand, returned as an absolute address
    fn fetch_branch(&mut self) -> InterpResult<usize> {
        let at = self.pc;
        match self.fetch()? {
            Inst::Branch(offset) => at
                .checked_add_signed(offset)
                .ok_or_else(|| RuntimeError::internal(format!("branch out of range at {at}"))),
            other => Err(RuntimeError::internal(format!("expected branch operand, found {other:?}"))),
        }
    }

    fn next_is_fetch_ret_val(&self) -> bool {
        self.program.code().get(self.pc) == Some(&Inst::Op(Opcode::FetchRetVal))
    }

    // ---- value stack ----

    fn push(&mut self, value: Value) -> InterpResult<()> {
        if self.stack.len() + self.frame_slots >= self.stack_limit {
            return Err(RuntimeError::stack_overflow());
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> InterpResult<Value> {
        if self.stack.len() <= self.frame.base() {
            return Err(RuntimeError::stack_underflow());
        }
        self.stack.pop().ok_or_else(RuntimeError::stack_underflow)
    }

    /// Value `n` slots below the top
    fn peek(&self, n: usize) -> InterpResult<Value> {
        let len = self.stack.len();
        if len < self.frame.base() + n + 1 {
            return Err(RuntimeError::stack_underflow());
        }
        Ok(self.stack[len - 1 - n])
    }

    /// Remove the top `n` values, oldest first
    fn pop_args(&mut self, n: usize) -> InterpResult<Vec<Value>> {
        let len = self.stack.len();
        if len < self.frame.base() + n {
            return Err(RuntimeError::stack_underflow());
        }
        Ok(self.stack.split_off(len - n))
    }

    // ---- symbols ----

    fn name_of(&self, symbols: &SymbolTable, sym: SymbolRef) -> String {
        self.program.symbol_name(symbols, sym).to_string()
    }

    fn local(&self, slot: usize) -> InterpResult<Value> {
        self.frame
            .locals
            .get(slot)
            .copied()
            .ok_or_else(|| RuntimeError::internal(format!("local slot {slot} out of range")))
    }

    fn read_symbol(&mut self, g: &mut Globals<'_>, sym: SymbolRef) -> InterpResult<Value> {
        let value = match sym {
            SymbolRef::Local(slot) => self.local(slot)?,
            SymbolRef::Global(id) => {
                let symbol = g.symbols.get(id);
                match symbol.class {
                    StorageClass::Global | StorageClass::Constant => symbol.value,
                    StorageClass::Argument(ArgIndex::Nth(n)) => {
                        if n >= self.frame.arg_count() {
                            return Err(RuntimeError::undefined_argument(&symbol.name));
                        }
                        self.stack[self.frame.args.start + n]
                    }
                    StorageClass::Argument(ArgIndex::Count) => Value::Int(self.frame.arg_count() as i64),
                    StorageClass::ComputedValue(f) => {
                        let outcome = self.invoke_native(g, f, &[]);
                        outcome
                            .result
                            .map_err(|msg| RuntimeError::native(&msg, &g.symbols.get(id).name))?
                    }
                    _ => {
                        return Err(RuntimeError::type_error(format!(
                            "reading non-variable: {}",
                            symbol.name
                        )));
                    }
                }
            }
        };
        if !value.is_set() {
            return Err(RuntimeError::variable_not_set(&self.name_of(g.symbols, sym)));
        }
        Ok(value)
    }

    /// Store without class checks; `sym` must be a local or a plain global
    fn store(&mut self, symbols: &mut SymbolTable, sym: SymbolRef, value: Value) -> InterpResult<()> {
        match sym {
            SymbolRef::Local(slot) => {
                let local = self
                    .frame
                    .locals
                    .get_mut(slot)
                    .ok_or_else(|| RuntimeError::internal(format!("local slot {slot} out of range")))?;
                *local = value;
            }
            SymbolRef::Global(id) => symbols.get_mut(id).value = value,
        }
        Ok(())
    }

    fn assign(&mut self, g: &mut Globals<'_>) -> InterpResult<()> {
        let sym = self.fetch_sym()?;
        if let SymbolRef::Global(id) = sym {
            let symbol = g.symbols.get(id);
            let message = match symbol.class {
                StorageClass::Global => None,
                StorageClass::Argument(_) => Some("assignment to function argument"),
                StorageClass::ComputedValue(_) => Some("assignment to read-only variable"),
                _ => Some("assignment to non-variable"),
            };
            if let Some(message) = message {
                return Err(RuntimeError::invalid_assignment(format!("{message}: {}", symbol.name)));
            }
        }
        let value = match self.pop()? {
            Value::Array(a) => Value::Array(a.deep_copy(g.heap)),
            other => other,
        };
        self.store(g.symbols, sym, value)
    }

    // ---- arithmetic ----

    fn binary_int(
        &mut self,
        g: &mut Globals<'_>,
        f: impl FnOnce(i64, i64) -> InterpResult<i64>,
    ) -> InterpResult<()> {
        let right = self.pop()?.to_integer(g.heap)?;
        let left = self.pop()?.to_integer(g.heap)?;
        self.push(Value::Int(f(left, right)?))
    }

    fn unary_int(&mut self, g: &mut Globals<'_>, f: impl FnOnce(i64) -> i64) -> InterpResult<()> {
        let n = self.pop()?.to_integer(g.heap)?;
        self.push(Value::Int(f(n)))
    }

    /// Set operator when both operands are arrays, integer operator otherwise
    fn array_or_int(
        &mut self,
        g: &mut Globals<'_>,
        array_op: fn(ArrayRef, ArrayRef, &mut Heap) -> ArrayRef,
        int_op: impl FnOnce(i64, i64) -> InterpResult<i64>,
    ) -> InterpResult<()> {
        let Value::Array(right) = self.peek(0)? else {
            return self.binary_int(g, int_op);
        };
        let Value::Array(left) = self.peek(1)? else {
            return Err(RuntimeError::type_error("can't mix math with arrays and non-arrays"));
        };
        self.pop()?;
        self.pop()?;
        let result = array_op(left, right, g.heap);
        self.push(Value::Array(result))
    }

    fn equal(&mut self, heap: &Heap) -> InterpResult<bool> {
        let v1 = self.pop()?;
        let v2 = self.pop()?;
        match (v1, v2) {
            (Value::Int(a), Value::Int(b)) => Ok(a == b),
            (Value::Str(a), Value::Str(b)) => Ok(heap.string(a) == heap.string(b)),
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                Ok(string_to_num(heap.string(s)) == Some(n))
            }
            _ => Err(RuntimeError::type_error("incompatible types to compare")),
        }
    }

    fn concat(&mut self, heap: &mut Heap) -> InterpResult<()> {
        let right = self.pop()?.to_bytes(heap)?.into_owned();
        let mut joined = self.pop()?.to_bytes(heap)?.into_owned();
        joined.extend_from_slice(&right);
        let value = heap.string_value(joined);
        self.push(value)
    }

    // ---- calls ----

    fn invoke_native(&mut self, g: &mut Globals<'_>, f: NativeFn, args: &[Value]) -> NativeOutcome {
        let mut ctx = NativeContext::new(
            g.heap,
            g.symbols,
            g.output,
            self.run_document,
            self.focus_document,
        );
        let result = f(&mut ctx, args);
        self.focus_document = ctx.focus_document();
        NativeOutcome {
            result,
            preempt: ctx.preempt_requested(),
            subroutine: ctx.take_subroutine(),
        }
    }

    fn call_subroutine(&mut self, g: &mut Globals<'_>) -> InterpResult<Status> {
        let sym = self.fetch_sym()?;
        let n_args = self.fetch_count()?;
        let class = match sym {
            SymbolRef::Global(id) => g.symbols.get(id).class.clone(),
            SymbolRef::Local(_) => StorageClass::Local,
        };
        match class {
            StorageClass::NativeFunction(f) => self.call_native(g, sym, f, n_args),
            StorageClass::MacroFunction(program) => {
                self.call_macro(program, n_args)?;
                Ok(Status::Ok)
            }
            _ => Err(RuntimeError::not_a_function(&self.name_of(g.symbols, sym))),
        }
    }

    fn call_native(
        &mut self,
        g: &mut Globals<'_>,
        sym: SymbolRef,
        f: NativeFn,
        n_args: usize,
    ) -> InterpResult<Status> {
        let args = self.pop_args(n_args)?;
        let outcome = self.invoke_native(g, f, &args);
        let value = outcome
            .result
            .map_err(|msg| RuntimeError::native(&msg, &self.name_of(g.symbols, sym)))?;

        if self.next_is_fetch_ret_val() {
            if !value.is_set() && !outcome.preempt {
                return Err(RuntimeError::no_return_value(&self.name_of(g.symbols, sym)));
            }
            self.push(value)?;
            self.pc += 1;
        }
        if let Some(program) = outcome.subroutine {
            debug!(caller = %self.name_of(g.symbols, sym), "running macro as subroutine");
            self.call_macro(program, 0)?;
        }
        if outcome.preempt {
            debug!(callee = %self.name_of(g.symbols, sym), pc = self.pc, "preempt requested");
            return Ok(Status::Preempt);
        }
        Ok(Status::Ok)
    }

    /// Push a frame for `program` taking the top `n_args` values as arguments
    fn call_macro(&mut self, program: Rc<Program>, n_args: usize) -> InterpResult<()> {
        let len = self.stack.len();
        if len < self.frame.base() + n_args {
            return Err(RuntimeError::stack_underflow());
        }
        let return_to = ReturnAddress {
            program: Rc::clone(&self.program),
            pc: self.pc,
        };
        let frame = Frame::new(Some(return_to), len - n_args..len, program.locals().len());
        if len + self.frame_slots + frame.footprint() > self.stack_limit {
            return Err(RuntimeError::stack_overflow());
        }
        self.frame_slots += frame.footprint();
        let caller = std::mem::replace(&mut self.frame, frame);
        self.callers.push(caller);
        self.program = program;
        self.pc = 0;
        debug!(depth = self.callers.len(), n_args, "frame push");
        Ok(())
    }

    fn return_from_frame(&mut self, g: &mut Globals<'_>, with_value: bool) -> InterpResult<Status> {
        let returned = if with_value { Some(self.pop()?) } else { None };
        self.stack.truncate(self.frame.args.start);
        self.frame_slots -= self.frame.footprint();

        let Some(addr) = self.frame.return_to.take() else {
            debug!("macro finished");
            return Ok(Status::Done(returned.unwrap_or_default()));
        };
        self.frame = self
            .callers
            .pop()
            .ok_or_else(|| RuntimeError::internal("return without a calling frame"))?;
        self.program = addr.program;
        self.pc = addr.pc;
        debug!(depth = self.callers.len(), "frame pop");

        if self.next_is_fetch_ret_val() {
            let Some(value) = returned else {
                let callee = match self.pc.checked_sub(2).and_then(|at| self.program.code().get(at)) {
                    Some(Inst::Sym(sym)) => self.name_of(g.symbols, *sym),
                    _ => "?".to_string(),
                };
                return Err(RuntimeError::missing_return_value(&callee));
            };
            self.push(value)?;
            self.pc += 1;
        }
        Ok(Status::Ok)
    }

    fn arg_array(&mut self, heap: &mut Heap) -> ArrayRef {
        if let Some(array) = self.frame.arg_array {
            return array;
        }
        let array = heap.new_array();
        for (i, value) in self.stack[self.frame.args.clone()].iter().enumerate() {
            array.insert_bytes(heap, (i + 1).to_string().as_bytes(), *value);
        }
        self.frame.arg_array = Some(array);
        array
    }

    // ---- arrays ----

    /// Join the top `n` values into one key. With `keep`, the subscripts
    /// stay on the stack.
    fn make_key(&mut self, heap: &Heap, n: usize, keep: bool) -> InterpResult<Vec<u8>> {
        let len = self.stack.len();
        if len < self.frame.base() + n {
            return Err(RuntimeError::stack_underflow());
        }
        let mut key = Vec::new();
        for (i, value) in self.stack[len - n..].iter().enumerate() {
            if i > 0 {
                key.extend_from_slice(ARRAY_DIM_SEP);
            }
            match value {
                Value::Int(k) => key.extend_from_slice(k.to_string().as_bytes()),
                Value::Str(s) => key.extend_from_slice(heap.string(*s)),
                _ => {
                    return Err(RuntimeError::type_error(
                        "can only index array with string or int.",
                    ));
                }
            }
        }
        if !keep {
            self.stack.truncate(len - n);
        }
        Ok(key)
    }

    fn lookup_key(heap: &Heap, array: ArrayRef, key: &[u8]) -> InterpResult<Value> {
        array
            .find(heap, key)
            .ok_or_else(|| RuntimeError::key_not_found(&String::from_utf8_lossy(key)))
    }

    fn array_ref(&mut self, heap: &mut Heap) -> InterpResult<()> {
        let n = self.fetch_count()?;
        let key = if n > 0 {
            Some(self.make_key(heap, n, false)?)
        } else {
            None
        };
        let Value::Array(array) = self.pop()? else {
            return Err(RuntimeError::not_an_array("operator [] on non-array"));
        };
        let value = match key {
            Some(key) => Self::lookup_key(heap, array, &key)?,
            None => Value::Int(array.size(heap) as i64),
        };
        self.push(value)
    }

    fn array_assign(&mut self, heap: &mut Heap) -> InterpResult<()> {
        let n = self.fetch_count()?;
        if n == 0 {
            return Err(RuntimeError::invalid_assignment("empty operator []"));
        }
        let value = self.pop()?;
        let key = self.make_key(heap, n, false)?;
        let Value::Array(array) = self.pop()? else {
            return Err(RuntimeError::not_an_array("cannot assign array element of non-array"));
        };
        let value = match value {
            Value::Array(src) => Value::Array(src.deep_copy(heap)),
            other => other,
        };
        array.insert_bytes(heap, &key, value);
        Ok(())
    }

    fn array_ref_assign_setup(&mut self, heap: &mut Heap) -> InterpResult<()> {
        let pending_rhs = self.fetch_imm()? != 0;
        let n = self.fetch_count()?;
        let rhs = if pending_rhs { Some(self.pop()?) } else { None };
        if n == 0 {
            return Err(RuntimeError::invalid_assignment("array[] not an lvalue"));
        }
        let key = self.make_key(heap, n, true)?;
        let Value::Array(array) = self.peek(n)? else {
            return Err(RuntimeError::not_an_array("operator [] on non-array"));
        };
        let value = Self::lookup_key(heap, array, &key)?;
        self.push(value)?;
        if let Some(rhs) = rhs {
            self.push(rhs)?;
        }
        Ok(())
    }

    fn iterator_slot(&self, symbols: &SymbolTable, sym: SymbolRef) -> InterpResult<usize> {
        match sym {
            SymbolRef::Local(slot) => Ok(slot),
            SymbolRef::Global(_) => Err(RuntimeError::internal(format!(
                "bad temporary iterator: {}",
                self.name_of(symbols, sym)
            ))),
        }
    }

    fn begin_array_iter(&mut self, g: &mut Globals<'_>) -> InterpResult<()> {
        let iterator = self.fetch_sym()?;
        let slot = self.iterator_slot(g.symbols, iterator)?;
        let Value::Array(array) = self.pop()? else {
            return Err(RuntimeError::not_an_array("can't iterate non-array"));
        };
        self.frame.set_cursor(slot, array.first(g.heap));
        Ok(())
    }

    fn array_iter(&mut self, g: &mut Globals<'_>) -> InterpResult<()> {
        let item = self.fetch_sym()?;
        let iterator = self.fetch_sym()?;
        let exit = self.fetch_branch()?;

        if let SymbolRef::Global(id) = item {
            if !matches!(g.symbols.get(id).class, StorageClass::Global) {
                return Err(RuntimeError::invalid_assignment(format!(
                    "can't assign to: {}",
                    self.name_of(g.symbols, item)
                )));
            }
        }
        self.store(g.symbols, item, Value::NoValue)?;
        let slot = self.iterator_slot(g.symbols, iterator)?;

        match self.frame.cursor(slot).flatten() {
            Some(node) if node.is_linked(g.heap) => {
                let key = node
                    .key(g.heap)
                    .ok_or_else(|| RuntimeError::internal("array iterator lost its entry"))?;
                self.store(g.symbols, item, Value::Str(key))?;
                self.frame.set_cursor(slot, node.next(g.heap));
            }
            _ => self.pc = exit,
        }
        Ok(())
    }

    fn in_array(&mut self, heap: &Heap) -> InterpResult<()> {
        let Value::Array(array) = self.pop()? else {
            return Err(RuntimeError::not_an_array("operator in on non-array"));
        };
        let found = match self.pop()? {
            Value::Array(keys) => keys
                .entries(heap)
                .all(|(key, _)| array.contains(heap, heap.string(key))),
            scalar => array.contains(heap, &scalar.to_bytes(heap)?),
        };
        self.push(Value::Int(i64::from(found)))
    }

    fn array_delete(&mut self, heap: &mut Heap) -> InterpResult<()> {
        let n = self.fetch_count()?;
        let key = if n > 0 {
            Some(self.make_key(heap, n, false)?)
        } else {
            None
        };
        let Value::Array(array) = self.pop()? else {
            return Err(RuntimeError::not_an_array("attempt to delete from non-array"));
        };
        match key {
            Some(key) => {
                array.delete(heap, &key);
            }
            None => array.delete_all(heap),
        }
        Ok(())
    }

    fn push_array_sym(&mut self, g: &mut Globals<'_>) -> InterpResult<()> {
        let sym = self.fetch_sym()?;
        let make_empty = self.fetch_imm()? != 0;
        let current = match sym {
            SymbolRef::Local(slot) => self.local(slot)?,
            SymbolRef::Global(id) => {
                let symbol = g.symbols.get(id);
                match symbol.class {
                    StorageClass::Global => symbol.value,
                    _ => {
                        return Err(RuntimeError::invalid_assignment(format!(
                            "assigning to non-lvalue array or non-array: {}",
                            symbol.name
                        )));
                    }
                }
            }
        };
        let value = if make_empty && !current.is_set() {
            let fresh = Value::Array(g.heap.new_array());
            self.store(g.symbols, sym, fresh)?;
            fresh
        } else {
            current
        };
        if !value.is_set() {
            return Err(RuntimeError::variable_not_set(&self.name_of(g.symbols, sym)));
        }
        self.push(value)
    }
}

/// Integer exponentiation; negative exponents truncate to zero
fn power(base: i64, exp: i64) -> InterpResult<i64> {
    let out_of_range = || RuntimeError::range("exponentiation result out of range");
    if exp < 0 {
        return match base {
            0 => Err(out_of_range()),
            1 => Ok(1),
            -1 => Ok(if exp % 2 == 0 { 1 } else { -1 }),
            _ => Ok(0),
        };
    }
    match base {
        0 => Ok(i64::from(exp == 0)),
        1 => Ok(1),
        -1 => Ok(if exp % 2 == 0 { 1 } else { -1 }),
        _ => u32::try_from(exp)
            .ok()
            .and_then(|e| base.checked_pow(e))
            .ok_or_else(out_of_range),
    }
}

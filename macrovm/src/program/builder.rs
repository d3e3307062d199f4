//! Program construction
//!
//! The builder collects words into a fixed-capacity buffer, tracks the
//! locals declared so far and the break/continue branches awaiting their
//! targets. [`ProgramBuilder::finish`] assigns frame slots and freezes the
//! result into a [`Program`].

use super::{Inst, Opcode, Program};
use crate::error::{AsmError, Result};
use crate::symbol::{GlobalId, SymbolRef, SymbolTable};
use tracing::warn;

/// Default capacity of the emission buffer, in words
pub const PROGRAM_SIZE: usize = 4096;

#[derive(Debug)]
struct LocalEntry {
    name: String,
    promoted: Option<GlobalId>,
}

#[derive(Debug, Clone, Copy)]
enum LoopFixup {
    /// Start of the innermost loop's list
    Marker,
    Break(usize),
    Continue(usize),
}

#[derive(Debug)]
pub struct ProgramBuilder {
    code: Vec<Inst>,
    capacity: usize,
    locals: Vec<LocalEntry>,
    loop_fixups: Vec<LoopFixup>,
    iterators: usize,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::with_capacity(PROGRAM_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ProgramBuilder {
            code: Vec::new(),
            capacity,
            locals: Vec::new(),
            loop_fixups: Vec::new(),
            iterators: 0,
        }
    }

    fn emit(&mut self, inst: Inst) -> Result<()> {
        if self.code.len() >= self.capacity {
            return Err(AsmError::ProgramTooLarge {
                capacity: self.capacity,
            });
        }
        self.code.push(inst);
        Ok(())
    }

    pub fn add_op(&mut self, op: Opcode) -> Result<()> {
        self.emit(Inst::Op(op))
    }

    pub fn add_sym(&mut self, sym: SymbolRef) -> Result<()> {
        self.emit(Inst::Sym(sym))
    }

    pub fn add_immediate(&mut self, value: i64) -> Result<()> {
        self.emit(Inst::Imm(value))
    }

    /// Append a branch operand targeting address `to`
    pub fn add_branch_offset(&mut self, to: usize) -> Result<()> {
        let at = self.code.len();
        self.emit(Inst::Branch(to as isize - at as isize))
    }

    /// Address of the next word to be emitted
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    /// Re-target the branch operand at `at`; used for forward branches
    pub fn set_branch_offset(&mut self, at: usize, to: usize) {
        if let Some(word) = self.code.get_mut(at) {
            *word = Inst::Branch(to as isize - at as isize);
        }
    }

    /// Exchange the adjacent blocks `start..boundary` and `boundary..end`
    pub fn swap_code(&mut self, start: usize, boundary: usize, end: usize) {
        if !(start <= boundary && boundary <= end && end <= self.code.len()) {
            return;
        }
        self.code[start..boundary].reverse();
        self.code[boundary..end].reverse();
        self.code[start..end].reverse();
    }

    /// Declare a local, or return the existing one with that name
    pub fn install_local(&mut self, name: &str) -> SymbolRef {
        if let Some(sym) = self.lookup_local(name) {
            return sym;
        }
        self.locals.push(LocalEntry {
            name: name.to_string(),
            promoted: None,
        });
        SymbolRef::Local(self.locals.len() - 1)
    }

    pub fn lookup_local(&self, name: &str) -> Option<SymbolRef> {
        self.locals
            .iter()
            .position(|l| l.name == name)
            .map(|i| match self.locals[i].promoted {
                Some(id) => SymbolRef::Global(id),
                None => SymbolRef::Local(i),
            })
    }

    /// Synthetic local holding the cursor of a `for (k in a)` loop
    pub fn install_iterator_symbol(&mut self) -> SymbolRef {
        let name = format!("aryiter #{}", self.iterators);
        self.iterators += 1;
        self.install_local(&name)
    }

    /// Turn a local into a global so that a later macro definition with the
    /// same name binds the symbol already referenced by this program
    pub fn promote_to_global(&mut self, symbols: &mut SymbolTable, sym: SymbolRef) -> SymbolRef {
        let SymbolRef::Local(index) = sym else {
            return sym;
        };
        let Some(entry) = self.locals.get_mut(index) else {
            return sym;
        };
        if let Some(id) = entry.promoted {
            return SymbolRef::Global(id);
        }
        if symbols.lookup(&entry.name).is_some() {
            warn!(name = %entry.name, "promoted local shadows an existing global");
        }
        let id = symbols.install_promoted(&entry.name);
        entry.promoted = Some(id);
        SymbolRef::Global(id)
    }

    pub fn start_loop(&mut self) {
        self.loop_fixups.push(LoopFixup::Marker);
    }

    fn in_loop(&self) -> bool {
        self.loop_fixups
            .iter()
            .any(|f| matches!(f, LoopFixup::Marker))
    }

    /// Register the branch operand at `addr` as a `break` of the current loop
    pub fn add_break_addr(&mut self, addr: usize) -> Result<()> {
        if !self.in_loop() {
            return Err(AsmError::NotInLoop);
        }
        self.loop_fixups.push(LoopFixup::Break(addr));
        Ok(())
    }

    /// Register the branch operand at `addr` as a `continue` of the current loop
    pub fn add_continue_addr(&mut self, addr: usize) -> Result<()> {
        if !self.in_loop() {
            return Err(AsmError::NotInLoop);
        }
        self.loop_fixups.push(LoopFixup::Continue(addr));
        Ok(())
    }

    /// Patch every break/continue of the innermost loop and close it
    pub fn fill_loop_addrs(&mut self, break_to: usize, continue_to: usize) {
        while let Some(fixup) = self.loop_fixups.pop() {
            match fixup {
                LoopFixup::Marker => return,
                LoopFixup::Break(at) => self.set_branch_offset(at, break_to),
                LoopFixup::Continue(at) => self.set_branch_offset(at, continue_to),
            }
        }
    }

    /// Assign dense frame slots to the remaining locals and freeze the code
    pub fn finish(self) -> Program {
        let mut slots = Vec::with_capacity(self.locals.len());
        let mut names = Vec::new();
        for local in &self.locals {
            match local.promoted {
                Some(id) => slots.push(SymbolRef::Global(id)),
                None => {
                    slots.push(SymbolRef::Local(names.len()));
                    names.push(local.name.clone());
                }
            }
        }
        let code = self
            .code
            .into_iter()
            .map(|inst| match inst {
                Inst::Sym(SymbolRef::Local(i)) => Inst::Sym(slots.get(i).copied().unwrap_or(SymbolRef::Local(i))),
                other => other,
            })
            .collect();
        Program::new(code, names)
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_limit() {
        let mut b = ProgramBuilder::with_capacity(2);
        b.add_op(Opcode::Dup).unwrap();
        b.add_op(Opcode::Dup).unwrap();
        let err = b.add_op(Opcode::Dup).unwrap_err();
        assert!(matches!(err, AsmError::ProgramTooLarge { capacity: 2 }));
        assert_eq!(err.to_string(), "macro too large");
    }

    #[test]
    fn test_swap_code_rotates_blocks() {
        let mut b = ProgramBuilder::new();
        for n in [1, 2, 3, 10, 20] {
            b.add_immediate(n).unwrap();
        }
        b.swap_code(0, 3, 5);
        let program = b.finish();
        let values: Vec<i64> = program
            .code()
            .iter()
            .map(|inst| match inst {
                Inst::Imm(n) => *n,
                _ => panic!("unexpected word"),
            })
            .collect();
        assert_eq!(values, [10, 20, 1, 2, 3]);
    }

    #[test]
    fn test_branch_offsets_relative_to_operand() {
        let mut b = ProgramBuilder::new();
        b.add_op(Opcode::Branch).unwrap();
        b.add_branch_offset(7).unwrap();
        assert_eq!(b.code[1], Inst::Branch(6));
        b.set_branch_offset(1, 0);
        assert_eq!(b.code[1], Inst::Branch(-1));
    }

    #[test]
    fn test_loop_fixups_fill_innermost_loop() {
        let mut b = ProgramBuilder::new();
        assert!(b.add_break_addr(0).is_err());

        b.start_loop();
        b.add_op(Opcode::Branch).unwrap();
        let outer_break = b.pc();
        b.add_branch_offset(0).unwrap();
        b.add_break_addr(outer_break).unwrap();

        b.start_loop();
        b.add_op(Opcode::Branch).unwrap();
        let inner_continue = b.pc();
        b.add_branch_offset(0).unwrap();
        b.add_continue_addr(inner_continue).unwrap();
        b.fill_loop_addrs(100, 50);

        assert_eq!(b.code[inner_continue], Inst::Branch(50 - 3));
        assert_eq!(b.code[outer_break], Inst::Branch(-1));

        b.fill_loop_addrs(40, 0);
        assert_eq!(b.code[outer_break], Inst::Branch(39));
    }

    #[test]
    fn test_finish_assigns_dense_slots() {
        let mut symbols = SymbolTable::new();
        let mut b = ProgramBuilder::new();
        let a = b.install_local("a");
        let f = b.install_local("f");
        let c = b.install_local("c");
        let iter = b.install_iterator_symbol();
        assert_eq!(b.install_local("a"), a);

        let promoted = b.promote_to_global(&mut symbols, f);
        for sym in [a, f, c, iter] {
            b.add_op(Opcode::PushSym).unwrap();
            b.add_sym(sym).unwrap();
        }
        let program = b.finish();

        assert_eq!(program.locals(), ["a", "c", "aryiter #0"]);
        let syms: Vec<SymbolRef> = program
            .code()
            .iter()
            .filter_map(|inst| match inst {
                Inst::Sym(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            syms,
            [
                SymbolRef::Local(0),
                promoted,
                SymbolRef::Local(1),
                SymbolRef::Local(2)
            ]
        );
        assert_eq!(symbols.lookup("f").map(SymbolRef::Global), Some(promoted));
    }
}

//! Instruction set, program builder and compiled programs
//!
//! A program is a flat sequence of words. Each instruction is an
//! [`Inst::Op`] word followed by the operand words listed by
//! [`Opcode::operands`]. Branch operands hold an offset relative to the
//! address of the operand word itself.

mod builder;

pub use builder::{ProgramBuilder, PROGRAM_SIZE};

use crate::heap::Heap;
use crate::interp::Value;
use crate::symbol::{StorageClass, SymbolRef, SymbolTable};
use std::fmt;

/// Operand kinds that may follow an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Sym,
    Imm,
    Branch,
}

macro_rules! opcodes {
    ($($name:ident => $mnemonic:literal [$($operand:ident),*]),* $(,)?) => {
        /// Virtual machine opcodes
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($name),*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name),*];

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic),*
                }
            }

            pub fn from_mnemonic(s: &str) -> Option<Opcode> {
                match s {
                    $($mnemonic => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            /// Operand words that follow this opcode, in order
            pub fn operands(self) -> &'static [Operand] {
                match self {
                    $(Opcode::$name => &[$(Operand::$operand),*]),*
                }
            }
        }
    };
}

opcodes! {
    ReturnNoVal => "return_no_val" [],
    Return => "return" [],
    PushSym => "push_sym" [Sym],
    Dup => "dup" [],
    Add => "add" [],
    Sub => "sub" [],
    Mul => "mul" [],
    Div => "div" [],
    Mod => "mod" [],
    Negate => "negate" [],
    Incr => "incr" [],
    Decr => "decr" [],
    Gt => "gt" [],
    Lt => "lt" [],
    Ge => "ge" [],
    Le => "le" [],
    Eq => "eq" [],
    Ne => "ne" [],
    BitAnd => "bit_and" [],
    BitOr => "bit_or" [],
    And => "and" [],
    Or => "or" [],
    Not => "not" [],
    Power => "power" [],
    Concat => "concat" [],
    Assign => "assign" [Sym],
    SubrCall => "subr_call" [Sym, Imm],
    FetchRetVal => "fetch_ret_val" [],
    Branch => "branch" [Branch],
    BranchTrue => "branch_true" [Branch],
    BranchFalse => "branch_false" [Branch],
    BranchNever => "branch_never" [Branch],
    ArrayRef => "array_ref" [Imm],
    ArrayAssign => "array_assign" [Imm],
    BeginArrayIter => "begin_array_iter" [Sym],
    ArrayIter => "array_iter" [Sym, Sym, Branch],
    InArray => "in_array" [],
    ArrayDelete => "array_delete" [Imm],
    PushArraySym => "push_array_sym" [Sym, Imm],
    ArrayRefAssignSetup => "array_ref_assign_setup" [Imm, Imm],
    PushArg => "push_arg" [],
    PushArgCount => "push_arg_count" [],
    PushArgArray => "push_arg_array" [],
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// One program word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inst {
    Op(Opcode),
    Sym(SymbolRef),
    Imm(i64),
    /// Offset from the address of this word
    Branch(isize),
}

/// Immutable compiled macro body
#[derive(Debug)]
pub struct Program {
    code: Box<[Inst]>,
    locals: Box<[String]>,
}

impl Program {
    pub(crate) fn new(code: Vec<Inst>, locals: Vec<String>) -> Self {
        Program {
            code: code.into_boxed_slice(),
            locals: locals.into_boxed_slice(),
        }
    }

    pub fn code(&self) -> &[Inst] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Local variable names, indexed by frame slot
    pub fn locals(&self) -> &[String] {
        &self.locals
    }

    /// Display name of a symbol operand
    pub fn symbol_name<'a>(&'a self, symbols: &'a SymbolTable, sym: SymbolRef) -> &'a str {
        match sym {
            SymbolRef::Global(id) => &symbols.get(id).name,
            SymbolRef::Local(slot) => self.locals.get(slot).map_or("?", String::as_str),
        }
    }

    /// Listing with one instruction per line
    pub fn disasm<'a>(&'a self, symbols: &'a SymbolTable, heap: &'a Heap) -> Disasm<'a> {
        Disasm {
            program: self,
            symbols,
            heap,
        }
    }
}

/// Display adapter produced by [`Program::disasm`]
pub struct Disasm<'a> {
    program: &'a Program,
    symbols: &'a SymbolTable,
    heap: &'a Heap,
}

impl Disasm<'_> {
    fn write_sym(&self, f: &mut fmt::Formatter<'_>, sym: SymbolRef) -> fmt::Result {
        if let SymbolRef::Global(id) = sym {
            let s = self.symbols.get(id);
            if let StorageClass::Constant = s.class {
                return match s.value {
                    Value::Int(n) => write!(f, "{n}"),
                    Value::Str(r) => write!(f, "{:?}", String::from_utf8_lossy(self.heap.string(r))),
                    _ => f.write_str(&s.name),
                };
            }
        }
        f.write_str(self.program.symbol_name(self.symbols, sym))
    }
}

impl fmt::Display for Disasm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.program.code();
        let mut pc = 0;
        while pc < code.len() {
            let Inst::Op(op) = code[pc] else {
                writeln!(f, "{pc:04}  .word {:?}", code[pc])?;
                pc += 1;
                continue;
            };
            write!(f, "{pc:04}  {op}")?;
            let start = pc;
            pc += 1;
            for kind in op.operands() {
                f.write_str(" ")?;
                match (kind, code.get(pc)) {
                    (Operand::Sym, Some(Inst::Sym(sym))) => self.write_sym(f, *sym)?,
                    (Operand::Imm, Some(Inst::Imm(n))) => write!(f, "{n}")?,
                    (Operand::Branch, Some(Inst::Branch(off))) => {
                        write!(f, "-> {:04}", pc as isize + off)?
                    }
                    (_, other) => write!(f, "<bad operand {other:?} at {start:04}>")?,
                }
                pc += 1;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

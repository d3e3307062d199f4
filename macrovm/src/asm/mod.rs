//! Assembler for the textual listing format
//!
//! A listing is line oriented. Each line holds an optional `label:`
//! followed by a directive or an instruction; `;` starts a comment.
//!
//! ```text
//! .macro double          ; body of a macro subroutine named `double`
//!     push_sym $1
//!     push_sym 2
//!     mul
//!     return
//! .end
//!
//! .local n               ; everything outside `.macro` is the main program
//!     push_sym 21
//!     subr_call double 1
//!     fetch_ret_val
//!     assign n
//! ```
//!
//! Symbol operands are resolved to an iterator alias, then a local of the
//! enclosing program, then an existing global; anything else becomes a new
//! global. Integer and string literals become interned constants. Branch
//! operands name a label of the same program. `.loop`, `break`,
//! `continue` and `.endloop <continue-label>` drive the builder's loop
//! fixups. Every program ends with an implicit `return_no_val`.

use crate::error::{AsmError, Result};
use crate::heap::Heap;
use crate::interp::Value;
use crate::lexer::{Token, tokenize};
use crate::program::{Opcode, Operand, Program, ProgramBuilder};
use crate::span::Span;
use crate::symbol::{SymbolRef, SymbolTable};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// Programs produced from one listing
#[derive(Debug)]
pub struct Assembly {
    pub main: Rc<Program>,
    /// Macros in definition order; each is also bound in the symbol table
    pub macros: Vec<(String, Rc<Program>)>,
}

impl Assembly {
    pub fn find_macro(&self, name: &str) -> Option<&Rc<Program>> {
        self.macros.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }
}

/// One program under construction
struct Unit {
    builder: ProgramBuilder,
    name: Option<(String, Span)>,
    labels: HashMap<String, usize>,
    fixups: Vec<(usize, String, Span)>,
    iterators: HashMap<String, SymbolRef>,
    open_loops: Vec<Span>,
}

impl Unit {
    fn new(capacity: usize, name: Option<(String, Span)>) -> Self {
        Unit {
            builder: ProgramBuilder::with_capacity(capacity),
            name,
            labels: HashMap::new(),
            fixups: Vec::new(),
            iterators: HashMap::new(),
            open_loops: Vec::new(),
        }
    }

    fn define_label(&mut self, label: &str, span: Span) -> Result<()> {
        if self.labels.contains_key(label) {
            return Err(AsmError::syntax(format!("duplicate label: {label}"), span));
        }
        self.labels.insert(label.to_string(), self.builder.pc());
        Ok(())
    }

    fn label(&self, label: &str, span: Span) -> Result<usize> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| AsmError::undefined_label(label, span))
    }

    fn finish(mut self) -> Result<Rc<Program>> {
        if let Some(span) = self.open_loops.pop() {
            return Err(AsmError::syntax(".loop without .endloop", span));
        }
        self.builder.add_op(Opcode::ReturnNoVal)?;
        for (at, label, span) in &self.fixups {
            let to = self.label(label, *span)?;
            self.builder.set_branch_offset(*at, to);
        }
        Ok(Rc::new(self.builder.finish()))
    }
}

fn active<'u>(current: &'u mut Option<Unit>, main: &'u mut Unit) -> &'u mut Unit {
    match current {
        Some(unit) => unit,
        None => main,
    }
}

struct Assembler<'a> {
    symbols: &'a mut SymbolTable,
    heap: &'a mut Heap,
    capacity: usize,
    main: Unit,
    current: Option<Unit>,
    macros: Vec<(String, Rc<Program>)>,
}

/// Assemble a listing, binding its macros in `symbols`
pub fn assemble(
    source: &str,
    symbols: &mut SymbolTable,
    heap: &mut Heap,
    capacity: usize,
) -> Result<Assembly> {
    let tokens = tokenize(source)?;
    let mut asm = Assembler {
        symbols,
        heap,
        capacity,
        main: Unit::new(capacity, None),
        current: None,
        macros: Vec::new(),
    };
    for line in tokens.split(|(t, _)| *t == Token::Newline) {
        asm.line(line)?;
    }
    if let Some(unit) = &asm.current {
        let (name, span) = unit.name.clone().unwrap_or_default();
        return Err(AsmError::syntax(format!("missing .end for macro {name}"), span));
    }
    let main = asm.main.finish()?;
    debug!(words = main.len(), macros = asm.macros.len(), "assembled listing");
    Ok(Assembly {
        main,
        macros: asm.macros,
    })
}

fn ident(token: &(Token, Span)) -> Result<&str> {
    match token {
        (Token::Ident(name), _) => Ok(name),
        (other, span) => Err(AsmError::syntax(format!("expected a name, found {other}"), *span)),
    }
}

fn one_ident<'t>(args: &'t [(Token, Span)], directive: &Token, span: Span) -> Result<(&'t str, Span)> {
    match args {
        [arg] => Ok((ident(arg)?, arg.1)),
        _ => Err(AsmError::syntax(format!("{directive} takes one name"), span)),
    }
}

fn no_args(args: &[(Token, Span)], what: &str, span: Span) -> Result<()> {
    match args.first() {
        None => Ok(()),
        Some((token, extra)) => Err(AsmError::syntax(
            format!("unexpected {token} after {what}"),
            Span::new(span.start, extra.end),
        )),
    }
}

impl Assembler<'_> {
    fn line(&mut self, line: &[(Token, Span)]) -> Result<()> {
        let mut rest = line;
        if let [(Token::Ident(label), span), (Token::Colon, _), tail @ ..] = rest {
            active(&mut self.current, &mut self.main).define_label(label, *span)?;
            rest = tail;
        }
        let Some(((first, span), args)) = rest.split_first() else {
            return Ok(());
        };
        let span = *span;
        match first {
            Token::Macro => self.begin_macro(args, span),
            Token::End => {
                no_args(args, ".end", span)?;
                self.end_macro(span)
            }
            Token::Local => {
                let unit = active(&mut self.current, &mut self.main);
                for arg in args {
                    unit.builder.install_local(ident(arg)?);
                }
                Ok(())
            }
            Token::Global => {
                for arg in args {
                    let name = ident(arg)?;
                    if self.symbols.lookup(name).is_none() {
                        self.symbols.define_global(name, Value::NoValue);
                    }
                }
                Ok(())
            }
            Token::Iter => {
                let (name, _) = one_ident(args, first, span)?;
                let unit = active(&mut self.current, &mut self.main);
                let sym = unit.builder.install_iterator_symbol();
                unit.iterators.insert(name.to_string(), sym);
                Ok(())
            }
            Token::Loop => {
                no_args(args, ".loop", span)?;
                let unit = active(&mut self.current, &mut self.main);
                unit.builder.start_loop();
                unit.open_loops.push(span);
                Ok(())
            }
            Token::EndLoop => {
                let (label, label_span) = one_ident(args, first, span)?;
                let unit = active(&mut self.current, &mut self.main);
                if unit.open_loops.pop().is_none() {
                    return Err(AsmError::syntax(".endloop without .loop", span));
                }
                let continue_to = unit.label(label, label_span)?;
                let break_to = unit.builder.pc();
                unit.builder.fill_loop_addrs(break_to, continue_to);
                Ok(())
            }
            Token::Ident(mnemonic) => self.instruction(mnemonic, span, args),
            other => Err(AsmError::syntax(format!("unexpected {other}"), span)),
        }
    }

    fn begin_macro(&mut self, args: &[(Token, Span)], span: Span) -> Result<()> {
        let (name, name_span) = one_ident(args, &Token::Macro, span)?;
        if self.current.is_some() {
            return Err(AsmError::syntax("nested .macro", span));
        }
        // A local of the main program with this name was a forward declaration
        if let Some(sym @ SymbolRef::Local(_)) = self.main.builder.lookup_local(name) {
            self.main.builder.promote_to_global(self.symbols, sym);
        }
        self.current = Some(Unit::new(self.capacity, Some((name.to_string(), name_span))));
        Ok(())
    }

    fn end_macro(&mut self, span: Span) -> Result<()> {
        let unit = self
            .current
            .take()
            .ok_or_else(|| AsmError::syntax(".end without .macro", span))?;
        let (name, _) = unit.name.clone().unwrap_or_default();
        let program = unit.finish()?;
        self.symbols.define_macro(&name, Rc::clone(&program));
        debug!(name = %name, words = program.len(), "assembled macro");
        self.macros.push((name, program));
        Ok(())
    }

    fn instruction(&mut self, mnemonic: &str, span: Span, args: &[(Token, Span)]) -> Result<()> {
        if mnemonic == "break" || mnemonic == "continue" {
            no_args(args, mnemonic, span)?;
            let unit = active(&mut self.current, &mut self.main);
            let at = unit.builder.pc() + 1;
            if mnemonic == "break" {
                unit.builder.add_break_addr(at)?;
            } else {
                unit.builder.add_continue_addr(at)?;
            }
            unit.builder.add_op(Opcode::Branch)?;
            return unit.builder.add_branch_offset(at);
        }

        let op = Opcode::from_mnemonic(mnemonic)
            .ok_or_else(|| AsmError::syntax(format!("unknown opcode: {mnemonic}"), span))?;
        let operands = op.operands();
        if args.len() != operands.len() {
            return Err(AsmError::syntax(
                format!("{op} takes {} operand(s), found {}", operands.len(), args.len()),
                span,
            ));
        }
        active(&mut self.current, &mut self.main).builder.add_op(op)?;

        for (kind, (token, arg_span)) in operands.iter().zip(args) {
            match (kind, token) {
                (Operand::Sym, _) => {
                    let sym = self.resolve_symbol(token, *arg_span)?;
                    active(&mut self.current, &mut self.main).builder.add_sym(sym)?;
                }
                (Operand::Imm, Token::IntLit(n)) => {
                    active(&mut self.current, &mut self.main).builder.add_immediate(*n)?;
                }
                (Operand::Branch, Token::Ident(label)) => {
                    let unit = active(&mut self.current, &mut self.main);
                    let at = unit.builder.pc();
                    unit.builder.add_branch_offset(at)?;
                    unit.fixups.push((at, label.clone(), *arg_span));
                }
                (Operand::Imm, other) => {
                    return Err(AsmError::syntax(format!("expected an integer, found {other}"), *arg_span));
                }
                (Operand::Branch, other) => {
                    return Err(AsmError::syntax(format!("expected a label, found {other}"), *arg_span));
                }
            }
        }
        Ok(())
    }

    fn resolve_symbol(&mut self, token: &Token, span: Span) -> Result<SymbolRef> {
        match token {
            Token::Ident(name) => {
                let unit = active(&mut self.current, &mut self.main);
                if let Some(sym) = unit.iterators.get(name) {
                    return Ok(*sym);
                }
                if let Some(sym) = unit.builder.lookup_local(name) {
                    return Ok(sym);
                }
                let id = match self.symbols.lookup(name) {
                    Some(id) => id,
                    None => self.symbols.define_global(name, Value::NoValue),
                };
                Ok(SymbolRef::Global(id))
            }
            Token::IntLit(n) => Ok(SymbolRef::Global(self.symbols.install_int_const(*n))),
            Token::StringLit(s) => Ok(SymbolRef::Global(
                self.symbols.install_string_const(self.heap, s.as_bytes()),
            )),
            other => Err(AsmError::syntax(format!("expected a symbol, found {other}"), span)),
        }
    }
}

//! Global symbol table
//!
//! Globals, interned constants, argument pseudo-variables, native functions,
//! macro functions and computed values all live here for the lifetime of the
//! process. Locals belong to a [`Program`] and are addressed by slot through
//! [`SymbolRef::Local`].

use crate::heap::Heap;
use crate::interp::{NativeContext, Value};
use crate::program::Program;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Native-function calling contract: a failure message may contain `%s`,
/// which is replaced by the callee's name
pub type NativeFn = fn(&mut NativeContext<'_>, &[Value]) -> Result<Value, String>;

/// Which argument an `Argument` symbol reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgIndex {
    /// Zero-based argument position
    Nth(usize),
    /// The argument count itself (`$n_args`)
    Count,
}

/// Storage class of a symbol
#[derive(Clone)]
pub enum StorageClass {
    Global,
    /// Frame slot of a program; never bound in the table itself
    Local,
    Argument(ArgIndex),
    Constant,
    NativeFunction(NativeFn),
    MacroFunction(Rc<Program>),
    /// Read-only pseudo-variable produced by a zero-argument native call
    ComputedValue(NativeFn),
}

impl StorageClass {
    pub fn name(&self) -> &'static str {
        match self {
            StorageClass::Global => "global",
            StorageClass::Local => "local",
            StorageClass::Argument(_) => "argument",
            StorageClass::Constant => "constant",
            StorageClass::NativeFunction(_) => "native function",
            StorageClass::MacroFunction(_) => "macro function",
            StorageClass::ComputedValue(_) => "computed value",
        }
    }
}

impl fmt::Debug for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageClass::Argument(index) => write!(f, "Argument({index:?})"),
            StorageClass::MacroFunction(prog) => write!(f, "MacroFunction({} words)", prog.len()),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub class: StorageClass,
    pub value: Value,
}

/// Index of a symbol in the global table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub(crate) u32);

/// Symbol operand of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolRef {
    Global(GlobalId),
    /// Frame slot of a local variable
    Local(usize),
}

/// Process-wide symbol table
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, GlobalId>,
    string_consts: HashMap<Vec<u8>, GlobalId>,
    int_consts: HashMap<i64, GlobalId>,
}

impl SymbolTable {
    /// Create a table holding the argument symbols `$1`..`$9` and `$n_args`
    pub fn new() -> Self {
        let mut table = SymbolTable::default();
        for i in 0..9 {
            table.install(
                &format!("${}", i + 1),
                StorageClass::Argument(ArgIndex::Nth(i)),
                Value::NoValue,
            );
        }
        table.install("$n_args", StorageClass::Argument(ArgIndex::Count), Value::NoValue);
        table
    }

    /// Bind `name`, replacing the class and value of an existing binding
    pub fn install(&mut self, name: &str, class: StorageClass, value: Value) -> GlobalId {
        if let Some(&id) = self.by_name.get(name) {
            let sym = &mut self.symbols[id.0 as usize];
            sym.class = class;
            sym.value = value;
            return id;
        }
        let id = self.push(name.to_string(), class, value);
        self.by_name.insert(name.to_string(), id);
        id
    }

    fn push(&mut self, name: String, class: StorageClass, value: Value) -> GlobalId {
        let id = GlobalId(self.symbols.len() as u32);
        self.symbols.push(Symbol { name, class, value });
        id
    }

    pub fn lookup(&self, name: &str) -> Option<GlobalId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: GlobalId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: GlobalId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    /// Global variable with an initial value
    pub fn define_global(&mut self, name: &str, value: Value) -> GlobalId {
        self.install(name, StorageClass::Global, value)
    }

    pub fn define_native(&mut self, name: &str, f: NativeFn) -> GlobalId {
        self.install(name, StorageClass::NativeFunction(f), Value::NoValue)
    }

    pub fn define_computed(&mut self, name: &str, f: NativeFn) -> GlobalId {
        self.install(name, StorageClass::ComputedValue(f), Value::NoValue)
    }

    /// Attach a compiled body to `name`. A symbol created earlier by a
    /// forward reference keeps its id, so code already referring to it
    /// calls the new body.
    pub fn define_macro(&mut self, name: &str, program: Rc<Program>) -> GlobalId {
        self.install(name, StorageClass::MacroFunction(program), Value::NoValue)
    }

    /// Global created for a local promoted by a forward declaration. An
    /// existing binding of the same name is shadowed, not modified.
    pub(crate) fn install_promoted(&mut self, name: &str) -> GlobalId {
        let id = self.push(name.to_string(), StorageClass::Global, Value::NoValue);
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn lookup_string_const(&self, bytes: &[u8]) -> Option<GlobalId> {
        self.string_consts.get(bytes).copied()
    }

    /// Intern a string literal; identical literals share one constant
    pub fn install_string_const(&mut self, heap: &mut Heap, bytes: &[u8]) -> GlobalId {
        if let Some(id) = self.lookup_string_const(bytes) {
            return id;
        }
        let name = format!("string #{}", self.string_consts.len());
        let value = heap.string_value(bytes);
        let id = self.push(name, StorageClass::Constant, value);
        self.string_consts.insert(bytes.to_vec(), id);
        id
    }

    /// Intern an integer literal
    pub fn install_int_const(&mut self, n: i64) -> GlobalId {
        if let Some(&id) = self.int_consts.get(&n) {
            return id;
        }
        let id = self.push(format!("const {n}"), StorageClass::Constant, Value::Int(n));
        self.int_consts.insert(n, id);
        id
    }

    pub fn iter(&self) -> impl Iterator<Item = (GlobalId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (GlobalId(i as u32), s))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

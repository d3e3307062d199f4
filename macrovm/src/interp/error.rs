//! Runtime errors for the interpreter

use std::fmt;

/// Runtime error raised by an instruction or a native function
///
/// Hosts are only promised `message`; `kind` classifies the failure for
/// tests and for host policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Kinds of runtime errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Value stack or frame space exhausted (deep recursion)
    StackOverflow,
    /// Pop below the current frame; an assembler or engine defect
    StackUnderflow,
    /// Array used as a scalar, incompatible comparison, ...
    TypeError,
    /// String used arithmetically is not a number
    NotNumeric,
    DivisionByZero,
    /// `$n` or `$args[n]` past the argument count
    UndefinedArgument,
    /// Read of an unset variable
    VariableNotSet,
    /// Call of a symbol that is neither a native nor a macro function
    NotAFunction,
    /// Use of the return value of a subroutine that returned nothing
    NoReturnValue,
    /// Array lookup of a missing key
    KeyNotFound,
    /// Array operation on a non-array
    NotAnArray,
    /// Store to something that cannot be assigned
    InvalidAssignment,
    /// Failure reported by a native function
    Native,
    /// Arithmetic result out of range
    Range,
    /// Malformed program reaching the engine
    Internal,
}

impl RuntimeError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            message: message.into(),
        }
    }

    pub fn stack_overflow() -> Self {
        Self::new(ErrorKind::StackOverflow, "macro stack overflow")
    }

    pub fn stack_underflow() -> Self {
        Self::new(ErrorKind::StackUnderflow, "macro stack underflow")
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn not_numeric() -> Self {
        Self::new(ErrorKind::NotNumeric, "string could not be converted to number")
    }

    pub fn division_by_zero() -> Self {
        Self::new(ErrorKind::DivisionByZero, "division by zero")
    }

    pub fn modulo_by_zero() -> Self {
        Self::new(ErrorKind::DivisionByZero, "modulo by zero")
    }

    pub fn undefined_argument(name: &str) -> Self {
        Self::new(
            ErrorKind::UndefinedArgument,
            format!("referenced undefined argument: {name}"),
        )
    }

    pub fn variable_not_set(name: &str) -> Self {
        Self::new(ErrorKind::VariableNotSet, format!("variable not set: {name}"))
    }

    pub fn not_a_function(name: &str) -> Self {
        Self::new(
            ErrorKind::NotAFunction,
            format!("{name} is not a function or subroutine"),
        )
    }

    pub fn no_return_value(name: &str) -> Self {
        Self::new(ErrorKind::NoReturnValue, format!("{name} does not return a value"))
    }

    /// A macro subroutine returned without a value where one was used
    pub fn missing_return_value(name: &str) -> Self {
        Self::new(
            ErrorKind::NoReturnValue,
            format!("using return value of {name} which does not return a value"),
        )
    }

    pub fn key_not_found(key: &str) -> Self {
        Self::new(
            ErrorKind::KeyNotFound,
            format!("referenced array value not in array: {key}"),
        )
    }

    pub fn not_an_array(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAnArray, message)
    }

    pub fn invalid_assignment(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidAssignment, message)
    }

    /// Wrap a native function's failure; `%s` is replaced by the callee name
    pub fn native(message: &str, callee: &str) -> Self {
        Self::new(ErrorKind::Native, message.replace("%s", callee))
    }

    pub fn range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Range, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// Result type for interpreter operations
pub type InterpResult<T> = Result<T, RuntimeError>;

//! Runtime values for the interpreter

use super::error::{InterpResult, RuntimeError};
use crate::heap::{ArrayRef, Heap, StrRef};
use std::borrow::Cow;

/// Runtime value
///
/// Strings and arrays are handles into the [`Heap`]; the value itself is
/// always `Copy`. Assigning an array between variables copies the tree (see
/// [`ArrayRef::deep_copy`]), never the handle alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Value {
    /// Unset variable, or a subroutine that returned nothing
    #[default]
    NoValue,
    Int(i64),
    Str(StrRef),
    Array(ArrayRef),
}

impl Value {
    /// Get type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::NoValue => "unset value",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, Value::NoValue)
    }

    /// Integer payload, without conversion
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<ArrayRef> {
        match self {
            Value::Array(a) => Some(*a),
            _ => None,
        }
    }

    /// Coerce to an integer, converting numeric strings
    pub fn to_integer(&self, heap: &Heap) -> InterpResult<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Str(s) => string_to_num(heap.string(*s)).ok_or_else(RuntimeError::not_numeric),
            Value::Array(_) | Value::NoValue => Err(RuntimeError::type_error(format!(
                "can't convert {} to integer",
                self.type_name()
            ))),
        }
    }

    /// Coerce to a byte string; integers render in decimal
    pub fn to_bytes<'h>(&self, heap: &'h Heap) -> InterpResult<Cow<'h, [u8]>> {
        match self {
            Value::Int(n) => Ok(Cow::Owned(n.to_string().into_bytes())),
            Value::Str(s) => Ok(Cow::Borrowed(heap.string(*s))),
            Value::Array(_) | Value::NoValue => Err(RuntimeError::type_error(format!(
                "can't convert {} to string",
                self.type_name()
            ))),
        }
    }

    /// Human-readable rendering, arrays included
    pub fn render(&self, heap: &Heap) -> String {
        match self {
            Value::NoValue => String::new(),
            Value::Int(n) => n.to_string(),
            Value::Str(s) => String::from_utf8_lossy(heap.string(*s)).into_owned(),
            Value::Array(a) => stacker::maybe_grow(super::STACK_RED_ZONE, super::STACK_GROW_SIZE, || {
                let items: Vec<String> = a
                    .entries(heap)
                    .map(|(k, v)| {
                        let key = String::from_utf8_lossy(heap.string(k));
                        match v {
                            Value::Str(_) => format!("{key:?}: {:?}", v.render(heap)),
                            _ => format!("{key:?}: {}", v.render(heap)),
                        }
                    })
                    .collect();
                format!("{{{}}}", items.join(", "))
            }),
        }
    }

    /// JSON rendering for host tooling; arrays become objects in key order
    pub fn to_json(&self, heap: &Heap) -> serde_json::Value {
        match self {
            Value::NoValue => serde_json::Value::Null,
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Str(s) => serde_json::Value::String(String::from_utf8_lossy(heap.string(*s)).into_owned()),
            Value::Array(a) => stacker::maybe_grow(super::STACK_RED_ZONE, super::STACK_GROW_SIZE, || {
                let map = a
                    .entries(heap)
                    .map(|(k, v)| (String::from_utf8_lossy(heap.string(k)).into_owned(), v.to_json(heap)))
                    .collect();
                serde_json::Value::Object(map)
            }),
        }
    }
}

/// Parse a macro-language number: optional blanks, optional sign, decimal
/// digits, optional blanks. A string with no digits at all (`""`, `" "`,
/// `"-"`) is numeric and reads as zero. Returns `None` for anything else,
/// including values outside the `i64` range.
pub fn string_to_num(bytes: &[u8]) -> Option<i64> {
    let is_blank = |b: &u8| *b == b' ' || *b == b'\t';
    let start = bytes.iter().position(|b| !is_blank(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_blank(b)).map_or(start, |i| i + 1);
    let body = &bytes[start..end];

    let (negative, digits) = match body.first() {
        Some(b'-') => (true, &body[1..]),
        Some(b'+') => (false, &body[1..]),
        _ => (false, body),
    };
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    let mut n: i64 = 0;
    for d in digits {
        let d = i64::from(d - b'0');
        n = n.checked_mul(10)?;
        n = if negative { n.checked_sub(d)? } else { n.checked_add(d)? };
    }
    Some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_num() {
        assert_eq!(string_to_num(b"42"), Some(42));
        assert_eq!(string_to_num(b"  -17\t"), Some(-17));
        assert_eq!(string_to_num(b"+5"), Some(5));
        assert_eq!(string_to_num(b""), Some(0));
        assert_eq!(string_to_num(b"-"), Some(0));
        assert_eq!(string_to_num(b"12a"), None);
        assert_eq!(string_to_num(b"1 2"), None);
        assert_eq!(string_to_num(b"-9223372036854775808"), Some(i64::MIN));
        assert_eq!(string_to_num(b"9223372036854775808"), None);
    }

    #[test]
    fn test_coercions() {
        let mut heap = Heap::new();
        let s = heap.string_value("12");
        assert_eq!(s.to_integer(&heap).unwrap(), 12);
        assert_eq!(Value::Int(-3).to_bytes(&heap).unwrap().as_ref(), b"-3");

        let word = heap.string_value("abc");
        let err = word.to_integer(&heap).unwrap_err();
        assert_eq!(err.message, "string could not be converted to number");

        let array = Value::Array(heap.new_array());
        assert_eq!(
            array.to_bytes(&heap).unwrap_err().message,
            "can't convert array to string"
        );
        assert_eq!(
            Value::NoValue.to_integer(&heap).unwrap_err().message,
            "can't convert unset value to integer"
        );
    }

    #[test]
    fn test_render_array() {
        let mut heap = Heap::new();
        let a = heap.new_array();
        a.insert_bytes(&mut heap, b"b", Value::Int(2));
        let v = heap.string_value("x");
        a.insert_bytes(&mut heap, b"a", v);
        assert_eq!(Value::Array(a).render(&heap), r#"{"a": "x", "b": 2}"#);
        assert_eq!(Value::Array(a).to_json(&heap), serde_json::json!({"a": "x", "b": 2}));
    }
}

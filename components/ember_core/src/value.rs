//! Tagged script values.
//!
//! Script values are a tagged union: primitives are stored inline,
//! strings are interned allocations, tables are handles into the VM
//! heap, and functions are shared closure objects. Native functions are
//! referenced by their bound name and resolved against the VM's native
//! registry at call time.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::function::{Closure, Coroutine};
use crate::string::InternedStr;
use crate::table::TableHandle;

/// Any script value.
///
/// # Examples
///
/// ```
/// use ember_core::Value;
///
/// assert!(!Value::Nil.is_truthy());
/// assert!(!Value::Boolean(false).is_truthy());
///
/// // Zero is truthy: only nil and false are falsy.
/// assert!(Value::Number(0.0).is_truthy());
/// assert_eq!(Value::Number(1.5).type_name(), "number");
/// ```
#[derive(Clone)]
pub enum Value {
    /// The absent value
    Nil,
    /// Boolean true or false
    Boolean(bool),
    /// IEEE 754 double-precision number
    Number(f64),
    /// Interned string
    Str(InternedStr),
    /// Heap table referenced by generation-checked handle
    Table(TableHandle),
    /// Native function referenced by its bound name
    Native(InternedStr),
    /// Bytecode function with captured upvalues
    Function(Rc<Closure>),
    /// Opaque host data
    Userdata(Rc<RefCell<dyn Any>>),
    /// Coroutine object (creation and inspection only)
    Coroutine(Rc<RefCell<Coroutine>>),
}

impl Value {
    /// Returns whether this value is truthy.
    ///
    /// Only `nil` and `false` are falsy; zero and the empty string are
    /// truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// The type tag name, as reported to scripts.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Native(_) => "native",
            Value::Function(_) => "function",
            Value::Userdata(_) => "userdata",
            Value::Coroutine(_) => "coroutine",
        }
    }

    /// Numeric payload, if this value is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String payload, if this value is a string.
    pub fn as_str(&self) -> Option<&InternedStr> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Table handle, if this value is a table.
    pub fn as_table(&self) -> Option<TableHandle> {
        match self {
            Value::Table(h) => Some(*h),
            _ => None,
        }
    }

    /// Whether this value is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Whether this value is a number.
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    /// Whether this value is a string.
    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    /// Whether this value is a table.
    pub fn is_table(&self) -> bool {
        matches!(self, Value::Table(_))
    }

    /// Whether this value is callable (bytecode function or native).
    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }
}

/// Format a number the way the display coercion prints it.
///
/// Integral finite values print without a decimal point; everything
/// else goes through `ryu` for the shortest round-trippable form. This
/// is the same text used for table-key normalization, so the number `1`
/// and the string `"1"` produce the same key.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n.is_sign_positive() {
            "inf".to_string()
        } else {
            "-inf".to_string()
        }
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        ryu::Buffer::new().format(n).to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s.as_str()),
            Value::Table(h) => write!(f, "<table {}>", h),
            Value::Native(name) => write!(f, "<native {}>", name.as_str()),
            Value::Function(c) => match &c.proto.name {
                Some(name) => write!(f, "<function {}>", name.as_str()),
                None => write!(f, "<function>"),
            },
            Value::Userdata(_) => write!(f, "<userdata>"),
            Value::Coroutine(_) => write!(f, "<coroutine>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Boolean(b) => f.debug_tuple("Boolean").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(&s.as_str()).finish(),
            Value::Table(h) => f.debug_tuple("Table").field(h).finish(),
            Value::Native(name) => f.debug_tuple("Native").field(&name.as_str()).finish(),
            Value::Function(c) => {
                let name = c.proto.name.as_ref().map(|n| n.as_str()).unwrap_or("?");
                f.debug_tuple("Function").field(&name).finish()
            }
            Value::Userdata(_) => write!(f, "Userdata(..)"),
            Value::Coroutine(_) => write!(f, "Coroutine(..)"),
        }
    }
}

impl PartialEq for Value {
    /// Equality compares type tags first. Matching nil/boolean/number
    /// compare by value; strings, tables, functions, and the rest
    /// compare by identity, consistent with the interning invariant.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a.ptr_eq(b),
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Userdata(a), Value::Userdata(b)) => Rc::ptr_eq(a, b),
            (Value::Coroutine(a), Value::Coroutine(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

//! Core value types and object model for the Ember Script runtime.
//!
//! This crate provides the foundational types shared by the VM and its
//! embedders: tagged values, interned strings, open-hash tables,
//! bytecode function objects, and the error taxonomy.
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of script values
//! - [`InternedStr`] / [`Interner`] - Canonical string allocation
//! - [`Table`] - Open-hash table with separate chaining
//! - [`Function`] / [`Closure`] - Bytecode function objects
//! - [`ScriptError`] - Runtime and compile error taxonomy
//!
//! # Examples
//!
//! ```
//! use ember_core::{Interner, Value};
//!
//! let mut strings = Interner::new();
//! let a = strings.intern("hello");
//! let b = strings.intern("hello");
//!
//! // Interning yields one canonical allocation per content.
//! assert!(a.ptr_eq(&b));
//! assert!(Value::Str(a).is_truthy());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod function;
mod string;
mod table;
mod upvalue;
mod value;

pub use error::ScriptError;
pub use function::{CodeHandle, Closure, Coroutine, CoroutineState, Function};
pub use string::{InternedStr, Interner};
pub use table::{Table, TableHandle};
pub use upvalue::{new_upvalue_handle, Upvalue, UpvalueHandle};
pub use value::Value;

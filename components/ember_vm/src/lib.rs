//! The Ember script virtual machine.
//!
//! A stack-based bytecode interpreter built for embedding: the host
//! creates a [`Vm`], binds native functions and tables, and runs
//! compiled functions or (with a compiler installed) source text.
//!
//! ```
//! use ember_vm::Vm;
//! use ember_core::Value;
//!
//! let mut vm = Vm::new();
//! vm.global_set("answer", Value::Number(42.0));
//! assert_eq!(vm.global_get("answer"), Value::Number(42.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod compiler;
mod config;
mod dispatch;
mod frame;
mod gc;
mod jit;
mod profile;
mod vm;

pub use compiler::ScriptCompiler;
pub use config::VmConfig;
pub use jit::JitBackend;
pub use profile::OpcodeProfile;
pub use vm::{DebugEvent, NativeFn, Vm};

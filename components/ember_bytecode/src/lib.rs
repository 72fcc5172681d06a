//! Bytecode instruction set for the Ember Script runtime
//!
//! This crate defines the stack-machine instruction set executed by the
//! VM: the opcode enum and the packed three-field instruction format.
//!
//! # Example
//!
//! ```
//! use ember_bytecode::{Instruction, Op};
//!
//! let inst = Instruction::with_b(Op::PushNumber, 3);
//! assert_eq!(inst.op, Op::PushNumber);
//! assert_eq!(inst.b, 3);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod instruction;
pub mod opcode;

// Re-export main types at crate root
pub use instruction::Instruction;
pub use opcode::{Op, UpvalueDescriptor, OP_COUNT};

//! Upvalues: captured variables shared between closures.
//!
//! An upvalue starts *open*, pointing at an absolute operand-stack slot
//! in the enclosing frame. When that slot is about to leave the stack
//! the VM *closes* the upvalue, moving the value into the upvalue
//! itself. Every closure that captured the slot shares one handle, so
//! writes through any of them stay visible to the rest.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::Value;

/// A captured variable, either still on the stack or moved off it.
#[derive(Debug, Clone)]
pub enum Upvalue {
    /// Lives at this absolute operand-stack index
    Open(usize),
    /// Migrated off the stack
    Closed(Value),
}

impl Upvalue {
    /// The stack slot an open upvalue points at.
    pub fn open_slot(&self) -> Option<usize> {
        match self {
            Upvalue::Open(slot) => Some(*slot),
            Upvalue::Closed(_) => None,
        }
    }
}

/// Shared handle to an upvalue.
pub type UpvalueHandle = Rc<RefCell<Upvalue>>;

/// Create a fresh open upvalue for a stack slot.
pub fn new_upvalue_handle(slot: usize) -> UpvalueHandle {
    Rc::new(RefCell::new(Upvalue::Open(slot)))
}

//! Call frames.

use std::rc::Rc;

use ember_core::Closure;

/// One activation record on the frame stack.
///
/// `stack_base` is the absolute operand-stack index of the callee
/// value; arguments sit directly above it, so local slot 0 is the
/// callee and slot `n` is the n-th argument.
#[derive(Debug)]
pub(crate) struct Frame {
    /// The closure being executed
    pub closure: Rc<Closure>,
    /// Index of the next instruction to execute
    pub ip: usize,
    /// Absolute operand-stack index of the callee slot
    pub stack_base: usize,
}

impl Frame {
    pub(crate) fn new(closure: Rc<Closure>, stack_base: usize) -> Self {
        Self {
            closure,
            ip: 0,
            stack_base,
        }
    }
}

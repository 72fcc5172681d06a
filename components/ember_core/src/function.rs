//! Function prototypes, closures, and coroutine shells.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use ember_bytecode::{Instruction, UpvalueDescriptor};

use crate::string::InternedStr;
use crate::upvalue::UpvalueHandle;
use crate::value::Value;

/// Opaque handle to backend-generated native code.
///
/// The VM never looks inside; it only stores the handle on the
/// prototype and hands it back to the backend at call sites.
#[derive(Clone)]
pub struct CodeHandle(pub Rc<dyn Any>);

impl fmt::Debug for CodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodeHandle({:p})", Rc::as_ptr(&self.0))
    }
}

/// An immutable compiled function prototype.
///
/// Prototypes are shared between every closure instantiated over them,
/// so the per-function hotness state lives in interior-mutable cells.
#[derive(Debug)]
pub struct Function {
    /// Function name, if the compiler recorded one
    pub name: Option<InternedStr>,
    /// Number of declared parameters
    pub arity: u8,
    /// Bytecode body
    pub code: Vec<Instruction>,
    /// Constant pool referenced by instruction operands
    pub constants: Vec<Value>,
    /// Capture plan for `Closure` instructions over this prototype
    pub upvalues: Vec<UpvalueDescriptor>,
    /// Calls observed so far, for the hotness trigger
    pub call_count: Cell<u32>,
    /// Compiled native code, once the backend has produced it
    pub jit_code: RefCell<Option<CodeHandle>>,
}

impl Function {
    /// Create a prototype with no captures.
    pub fn new(name: Option<InternedStr>, arity: u8, code: Vec<Instruction>) -> Self {
        Self {
            name,
            arity,
            code,
            constants: Vec::new(),
            upvalues: Vec::new(),
            call_count: Cell::new(0),
            jit_code: RefCell::new(None),
        }
    }

    /// Bump the call counter and return the new count.
    pub fn record_call(&self) -> u32 {
        let count = self.call_count.get().saturating_add(1);
        self.call_count.set(count);
        count
    }

    /// Whether the backend has already compiled this prototype.
    pub fn has_jit_code(&self) -> bool {
        self.jit_code.borrow().is_some()
    }

    /// Store the backend's compiled code for this prototype.
    pub fn cache_jit_code(&self, handle: CodeHandle) {
        *self.jit_code.borrow_mut() = Some(handle);
    }
}

/// A function prototype bound to its captured upvalues.
#[derive(Debug, Clone)]
pub struct Closure {
    /// Shared prototype
    pub proto: Rc<Function>,
    /// Captured variables, in descriptor order
    pub upvalues: Vec<UpvalueHandle>,
}

impl Closure {
    /// Wrap a prototype with no captures.
    pub fn new(proto: Rc<Function>) -> Self {
        Self {
            proto,
            upvalues: Vec::new(),
        }
    }
}

/// Lifecycle state of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    /// Created or yielded, waiting to be resumed
    Suspended,
    /// Currently executing
    Running,
    /// Returned or errored; cannot be resumed
    Dead,
}

/// A coroutine shell around a closure.
///
/// Creation and status queries work; transferring control does not yet,
/// so resuming one raises a dispatch error.
#[derive(Debug)]
pub struct Coroutine {
    /// Current lifecycle state
    pub state: CoroutineState,
    /// The function body the coroutine would run
    pub closure: Rc<Closure>,
}

impl Coroutine {
    /// Create a suspended coroutine over a closure.
    pub fn new(closure: Rc<Closure>) -> Self {
        Self {
            state: CoroutineState::Suspended,
            closure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_bytecode::Op;

    fn proto() -> Function {
        Function::new(None, 0, vec![Instruction::new(Op::Return)])
    }

    #[test]
    fn test_record_call_counts_up() {
        let f = proto();
        assert_eq!(f.record_call(), 1);
        assert_eq!(f.record_call(), 2);
        assert_eq!(f.call_count.get(), 2);
    }

    #[test]
    fn test_jit_cache() {
        let f = proto();
        assert!(!f.has_jit_code());
        f.cache_jit_code(CodeHandle(Rc::new(42u32)));
        assert!(f.has_jit_code());
    }

    #[test]
    fn test_coroutine_starts_suspended() {
        let co = Coroutine::new(Rc::new(Closure::new(Rc::new(proto()))));
        assert_eq!(co.state, CoroutineState::Suspended);
    }
}

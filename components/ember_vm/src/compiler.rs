//! Compiler boundary.

use std::rc::Rc;

use ember_core::{Function, Interner, ScriptError};

/// Source-to-bytecode compiler installed by the host.
///
/// The VM owns no parser; [`crate::Vm::eval`] hands source text to the
/// installed compiler and runs whatever prototype comes back. The
/// compiler interns every name and string constant through the VM's
/// interner so runtime comparisons stay pointer comparisons.
pub trait ScriptCompiler {
    /// Compile a chunk of source into a zero-arity function prototype.
    ///
    /// `name` labels the chunk for diagnostics and for the prototype's
    /// `name` field; [`crate::Vm::eval`] passes `"<eval>"` and
    /// [`crate::Vm::eval_named`] passes the host's label.
    fn compile(
        &mut self,
        source: &str,
        name: &str,
        strings: &mut Interner,
    ) -> Result<Rc<Function>, ScriptError>;
}

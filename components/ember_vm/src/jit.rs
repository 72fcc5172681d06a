//! JIT backend boundary.

use std::rc::Rc;

use ember_core::{CodeHandle, Function, ScriptError};

/// Native-code backend installed by the host.
///
/// The interpreter drives the hotness policy: once a function's call
/// count reaches the configured threshold it is handed here exactly
/// once, and the returned [`CodeHandle`] is cached on the prototype.
/// The handle is opaque to the VM; what the backend puts behind it and
/// how calls eventually enter it are the backend's business.
pub trait JitBackend {
    /// Compile a hot function prototype.
    fn compile(&mut self, proto: &Rc<Function>) -> Result<CodeHandle, ScriptError>;
}

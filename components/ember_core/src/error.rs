//! Script error taxonomy.

use thiserror::Error;

/// Errors raised by compilation, execution, or the host API.
///
/// Runtime errors halt the current run; the VM stays alive and the
/// host can inspect, reset, and reuse it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    /// Source text failed to compile
    #[error("compile error at line {line}: {message}")]
    Compile {
        /// What the compiler rejected
        message: String,
        /// 1-based source line
        line: u32,
    },

    /// An operand had the wrong type for an operation
    #[error("type error: {0}")]
    Type(String),

    /// Arithmetic fault, such as division or modulo by zero
    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    /// A callee received the wrong number of arguments
    #[error("arity error: expected {expected} arguments, got {got}")]
    Arity {
        /// Declared parameter count
        expected: u8,
        /// Arguments actually pushed
        got: u8,
    },

    /// A fixed-capacity structure overflowed or underflowed
    #[error("capacity error: {0}")]
    Capacity(String),

    /// Malformed bytecode or an unsupported instruction
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// An out-of-range constant, local, or upvalue index
    #[error("index error: {0}")]
    Index(String),
}

impl ScriptError {
    /// Stack overflow on the operand stack.
    pub fn stack_overflow() -> Self {
        ScriptError::Capacity("operand stack overflow".to_string())
    }

    /// Pop or peek on an empty operand stack.
    pub fn stack_underflow() -> Self {
        ScriptError::Capacity("operand stack underflow".to_string())
    }

    /// Call-frame stack exhausted.
    pub fn frame_overflow() -> Self {
        ScriptError::Capacity("call frame stack overflow".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ScriptError::Arity {
            expected: 2,
            got: 3,
        };
        assert_eq!(
            err.to_string(),
            "arity error: expected 2 arguments, got 3"
        );

        let err = ScriptError::Compile {
            message: "unexpected token".to_string(),
            line: 4,
        };
        assert_eq!(err.to_string(), "compile error at line 4: unexpected token");

        assert_eq!(
            ScriptError::stack_underflow().to_string(),
            "capacity error: operand stack underflow"
        );
    }
}

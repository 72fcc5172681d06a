//! Bytecode opcodes for the stack-based VM
//!
//! Defines every instruction's operation tag. Operand meaning is noted
//! per variant: `a` and `b` refer to the instruction's packed fields,
//! and "const" means an index into the executing function's constant
//! pool.

/// Descriptor for a captured variable (upvalue)
///
/// Produced by the compiler and stored on the function proto; consumed
/// by the `Closure` opcode when the closure is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpvalueDescriptor {
    /// true if captured from the enclosing frame's locals, false if
    /// re-captured from the enclosing closure's upvalues
    pub is_local: bool,
    /// Local slot (if local) or upvalue index (if not)
    pub index: u16,
}

impl UpvalueDescriptor {
    /// Create a new upvalue descriptor
    pub fn new(is_local: bool, index: u16) -> Self {
        Self { is_local, index }
    }
}

/// Bytecode operation tags
///
/// A fixed-size enum rather than a payload-carrying one: the dispatch
/// loop reads operands from the instruction's `a`/`b` fields, which
/// keeps instructions `Copy` and makes per-opcode profiling arrays
/// straightforward to index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    // Stack operations
    /// Push nil
    PushNil,
    /// Push boolean true
    PushTrue,
    /// Push boolean false
    PushFalse,
    /// Push number constant (b: const)
    PushNumber,
    /// Push string constant (b: const)
    PushString,
    /// Pop and discard top of stack
    Pop,
    /// Duplicate top of stack
    Dup,
    /// Exchange the two top slots
    Swap,

    // Variables
    /// Push local slot relative to frame base (b: slot)
    GetLocal,
    /// Store top of stack into local slot, without popping (b: slot)
    SetLocal,
    /// Push global by name (b: string const)
    GetGlobal,
    /// Store top of stack into global, without popping (b: string const)
    SetGlobal,
    /// Push captured variable (b: upvalue index)
    GetUpvalue,
    /// Store top of stack into captured variable (b: upvalue index)
    SetUpvalue,

    // Table operations
    /// Push a fresh empty table (b: capacity hint)
    NewTable,
    /// Pop key and table, push table[key]
    GetField,
    /// Pop value, key and table, push the stored value
    SetField,

    // Arithmetic
    /// Add numbers or concatenate strings
    Add,
    /// Subtract
    Sub,
    /// Multiply
    Mul,
    /// Divide (division by zero is an error)
    Div,
    /// Floating-point modulo (modulo by zero is an error)
    Mod,
    /// Negate
    Neg,
    /// Exponentiation
    Pow,

    // Comparison
    /// Equality (tag, then value or identity)
    Eq,
    /// Inequality
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,

    // Logical
    /// Truthiness AND of the two top values
    And,
    /// Truthiness OR of the two top values
    Or,
    /// Truthiness NOT of the top value
    Not,

    // Control flow
    /// Jump forward by b instructions
    Jump,
    /// Jump forward by b if top of stack is falsy (peeks, does not pop)
    JumpIfFalse,
    /// Jump forward by b if top of stack is truthy (peeks, does not pop)
    JumpIfTrue,
    /// Jump backward by b instructions
    Loop,

    // Functions
    /// Call the value below the arguments (a: argc)
    Call,
    /// Return from the current frame (a: return value count, 0 or 1)
    Return,
    /// Materialize a closure from a function constant (b: const)
    Closure,
    /// Close open upvalues at or above the current top slot
    CloseUpvalue,

    // Coroutines (declared, not supported at runtime)
    /// Suspend the running coroutine (a: value count)
    Yield,
    /// Resume a suspended coroutine (a: value count)
    Resume,

    // Debug
    /// Pop and print the display form of the top value
    Print,
    /// Pop and fail the run if the value is falsy
    Assert,
    /// Invoke the debug hook if one is installed
    Breakpoint,
}

/// Number of opcodes, used to size per-opcode profiling tables
pub const OP_COUNT: usize = Op::Breakpoint as usize + 1;

impl Op {
    /// Every opcode in index order, for iterating profiling tables
    pub const ALL: [Op; OP_COUNT] = [
        Op::PushNil,
        Op::PushTrue,
        Op::PushFalse,
        Op::PushNumber,
        Op::PushString,
        Op::Pop,
        Op::Dup,
        Op::Swap,
        Op::GetLocal,
        Op::SetLocal,
        Op::GetGlobal,
        Op::SetGlobal,
        Op::GetUpvalue,
        Op::SetUpvalue,
        Op::NewTable,
        Op::GetField,
        Op::SetField,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Mod,
        Op::Neg,
        Op::Pow,
        Op::Eq,
        Op::Ne,
        Op::Lt,
        Op::Le,
        Op::Gt,
        Op::Ge,
        Op::And,
        Op::Or,
        Op::Not,
        Op::Jump,
        Op::JumpIfFalse,
        Op::JumpIfTrue,
        Op::Loop,
        Op::Call,
        Op::Return,
        Op::Closure,
        Op::CloseUpvalue,
        Op::Yield,
        Op::Resume,
        Op::Print,
        Op::Assert,
        Op::Breakpoint,
    ];

    /// Index of this opcode for profiling tables
    pub fn index(self) -> usize {
        self as usize
    }

    /// Check if this opcode transfers control (ends a basic block)
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Op::Jump | Op::JumpIfFalse | Op::JumpIfTrue | Op::Loop | Op::Return
        )
    }

    /// Check if this opcode reads the constant pool
    pub fn reads_constant(self) -> bool {
        matches!(
            self,
            Op::PushNumber | Op::PushString | Op::GetGlobal | Op::SetGlobal | Op::Closure
        )
    }
}

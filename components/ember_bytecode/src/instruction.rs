//! Packed bytecode instruction representation

use crate::opcode::Op;

/// A single bytecode instruction
///
/// Fixed 32-bit layout: one opcode tag plus two operand fields. `a`
/// carries small operands (argument counts, return counts), `b` carries
/// wide operands (constant-pool indices, stack slots, jump offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// The operation tag
    pub op: Op,
    /// Narrow operand (argc, return count, flags)
    pub a: u8,
    /// Wide operand (constant index, slot, jump offset)
    pub b: u16,
}

impl Instruction {
    /// Create an instruction with no operands
    pub fn new(op: Op) -> Self {
        Self { op, a: 0, b: 0 }
    }

    /// Create an instruction with a narrow operand
    pub fn with_a(op: Op, a: u8) -> Self {
        Self { op, a, b: 0 }
    }

    /// Create an instruction with a wide operand
    pub fn with_b(op: Op, b: u16) -> Self {
        Self { op, a: 0, b }
    }

    /// Create an instruction with both operands
    pub fn with_ab(op: Op, a: u8, b: u16) -> Self {
        Self { op, a, b }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_new() {
        let inst = Instruction::new(Op::Add);
        assert_eq!(inst.op, Op::Add);
        assert_eq!(inst.a, 0);
        assert_eq!(inst.b, 0);
    }

    #[test]
    fn test_instruction_operands() {
        let inst = Instruction::with_ab(Op::Call, 2, 0);
        assert_eq!(inst.a, 2);

        let inst = Instruction::with_b(Op::PushNumber, 7);
        assert_eq!(inst.b, 7);
    }

    #[test]
    fn test_instruction_is_copy() {
        let inst = Instruction::with_b(Op::Jump, 5);
        let copy = inst;
        assert_eq!(inst, copy);
    }
}

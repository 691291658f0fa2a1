//! Opcodes, instructions, and the [`BytecodeProgram`] container (§3, §4.D).

use serde::{Deserialize, Serialize};

/// The complete opcode set (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    /// No-op.
    Nop,
    /// Push a number operand.
    PushNum,
    /// Push a string-pool operand.
    PushStr,
    /// Push a bool operand.
    PushBool,
    /// Push the value of a local variable.
    PushVar,
    /// Discard the top of stack.
    Pop,
    /// Add the top two values.
    Add,
    /// Subtract: second-from-top minus top ("second OP top").
    Sub,
    /// Multiply the top two values.
    Mul,
    /// Divide: second-from-top by top ("second OP top").
    Div,
    /// Modulo: second-from-top mod top ("second OP top").
    Mod,
    /// Equality comparison.
    Eq,
    /// Inequality comparison.
    Neq,
    /// Greater-than comparison ("second OP top").
    Gt,
    /// Less-than comparison ("second OP top").
    Lt,
    /// Greater-or-equal comparison ("second OP top").
    Gte,
    /// Less-or-equal comparison ("second OP top").
    Lte,
    /// Logical AND.
    And,
    /// Logical OR.
    Or,
    /// Logical NOT.
    Not,
    /// Unconditional jump to an instruction address.
    Jump,
    /// Pop one value; jump if truthy.
    JumpIf,
    /// Pop one value; jump if falsy.
    JumpIfNot,
    /// Call a host function looked up by function-pool index.
    Call,
    /// Return the top of stack (or Null if empty), ending the program.
    Return,
    /// Pop the top of stack into a local variable.
    SetVar,
    /// Read a named property off the top-of-stack object.
    GetProp,
    /// Write a named property onto the top-of-stack object.
    SetProp,
    /// Build a new array from the top N stack values (operand = count).
    NewArray,
    /// Build a new empty object.
    NewObject,
    /// Successful terminal: top of stack is the result.
    Halt,
}

/// The single operand a bytecode instruction may carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// No operand.
    None,
    /// An immediate number (used by `PUSH_NUM`).
    Number(f64),
    /// An index into the string pool.
    StringIndex(u16),
    /// An immediate bool (used by `PUSH_BOOL`).
    Bool(bool),
    /// An index into the local variable array.
    VarIndex(u16),
    /// An instruction address (used by jumps).
    JumpTarget(u16),
    /// An index into the function-name pool.
    FunctionIndex(u16),
    /// An index into the property-name pool.
    PropertyIndex(u16),
    /// A small count (used by `NEW_ARRAY`'s element count, `CALL`'s arity).
    Count(u16),
}

/// One bytecode instruction: an opcode plus its single operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// The operation to perform.
    pub op: Opcode,
    /// The operand, or `Operand::None` for operand-less opcodes.
    pub operand: Operand,
}

impl Instruction {
    /// Construct an instruction.
    pub fn new(op: Opcode, operand: Operand) -> Self {
        Self { op, operand }
    }
}

/// A complete, portable bytecode program (§3).
///
/// Owned by whichever tool or driver entry holds it; freed with the owner.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BytecodeProgram {
    /// The instruction stream.
    pub instructions: Vec<Instruction>,
    /// String constants referenced by `PUSH_STR` / string-bearing opcodes.
    pub string_pool: Vec<String>,
    /// Names of local variables, for `PUSH_VAR` / `SET_VAR` diagnostics.
    pub variable_names: Vec<String>,
    /// Property names referenced by `GET_PROP` / `SET_PROP`.
    pub property_names: Vec<String>,
    /// Host function names referenced by `CALL`.
    pub function_names: Vec<String>,
}

impl BytecodeProgram {
    /// An empty program with no instructions or pools.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_construction() {
        let ins = Instruction::new(Opcode::PushNum, Operand::Number(3.0));
        assert_eq!(ins.op, Opcode::PushNum);
        assert_eq!(ins.operand, Operand::Number(3.0));
    }

    #[test]
    fn empty_program_has_empty_pools() {
        let program = BytecodeProgram::new();
        assert!(program.instructions.is_empty());
        assert!(program.string_pool.is_empty());
    }
}

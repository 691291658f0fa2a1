//! Binary wire format for [`BytecodeProgram`] (§6):
//!
//! ```text
//! magic(4="MCBC") | version(u16) | instr_count(u32) | string_count(u32)
//! | var_count(u32) | prop_count(u32) | func_count(u32)
//! | instructions... | string_pool... | variable_names... | property_names...
//! | function_names...
//! ```
//!
//! Every instruction is `op(u8) | operand_tag(u8) | operand_payload`.
//! Every pool entry is a length-prefixed (`u32`) UTF-8 string.

use super::program::{BytecodeProgram, Instruction, Opcode, Operand};
use crate::error::BytecodeError;

const MAGIC: &[u8; 4] = b"MCBC";
const VERSION: u16 = 1;

/// Encode `program` to its binary wire format.
pub fn serialize(program: &BytecodeProgram) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(program.instructions.len() as u32).to_le_bytes());
    out.extend_from_slice(&(program.string_pool.len() as u32).to_le_bytes());
    out.extend_from_slice(&(program.variable_names.len() as u32).to_le_bytes());
    out.extend_from_slice(&(program.property_names.len() as u32).to_le_bytes());
    out.extend_from_slice(&(program.function_names.len() as u32).to_le_bytes());

    for instruction in &program.instructions {
        write_instruction(&mut out, instruction);
    }
    for pool in [
        &program.string_pool,
        &program.variable_names,
        &program.property_names,
        &program.function_names,
    ] {
        for entry in pool {
            write_string(&mut out, entry);
        }
    }
    out
}

/// Decode a program previously produced by [`serialize`].
pub fn deserialize(bytes: &[u8]) -> Result<BytecodeProgram, BytecodeError> {
    let mut cursor = Cursor::new(bytes);
    let magic = cursor.take(4)?;
    if magic != MAGIC.as_slice() {
        return Err(BytecodeError::MalformedImage("bad magic".into()));
    }
    let version = u16::from_le_bytes(cursor.take(2)?.try_into().unwrap());
    if version != VERSION {
        return Err(BytecodeError::MalformedImage(format!("unsupported version {version}")));
    }
    let instr_count = cursor.take_u32()?;
    let string_count = cursor.take_u32()?;
    let var_count = cursor.take_u32()?;
    let prop_count = cursor.take_u32()?;
    let func_count = cursor.take_u32()?;

    let mut instructions = Vec::with_capacity(instr_count as usize);
    for _ in 0..instr_count {
        instructions.push(read_instruction(&mut cursor)?);
    }
    let string_pool = read_strings(&mut cursor, string_count)?;
    let variable_names = read_strings(&mut cursor, var_count)?;
    let property_names = read_strings(&mut cursor, prop_count)?;
    let function_names = read_strings(&mut cursor, func_count)?;

    if !cursor.is_empty() {
        return Err(BytecodeError::MalformedImage("trailing bytes after program".into()));
    }

    Ok(BytecodeProgram {
        instructions,
        string_pool,
        variable_names,
        property_names,
        function_names,
    })
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn opcode_tag(op: Opcode) -> u8 {
    op as u8
}

fn opcode_from_tag(tag: u8) -> Result<Opcode, BytecodeError> {
    const OPS: [Opcode; 30] = [
        Opcode::Nop,
        Opcode::PushNum,
        Opcode::PushStr,
        Opcode::PushBool,
        Opcode::PushVar,
        Opcode::Pop,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Eq,
        Opcode::Neq,
        Opcode::Gt,
        Opcode::Lt,
        Opcode::Gte,
        Opcode::Lte,
        Opcode::And,
        Opcode::Or,
        Opcode::Not,
        Opcode::Jump,
        Opcode::JumpIf,
        Opcode::JumpIfNot,
        Opcode::Call,
        Opcode::Return,
        Opcode::SetVar,
        Opcode::GetProp,
        Opcode::SetProp,
        Opcode::NewArray,
        Opcode::NewObject,
    ];
    if tag as usize == 30 {
        return Ok(Opcode::Halt);
    }
    OPS.get(tag as usize)
        .copied()
        .ok_or_else(|| BytecodeError::MalformedImage(format!("unknown opcode tag {tag}")))
}

const OPERAND_NONE: u8 = 0;
const OPERAND_NUMBER: u8 = 1;
const OPERAND_STRING_INDEX: u8 = 2;
const OPERAND_BOOL: u8 = 3;
const OPERAND_VAR_INDEX: u8 = 4;
const OPERAND_JUMP_TARGET: u8 = 5;
const OPERAND_FUNCTION_INDEX: u8 = 6;
const OPERAND_PROPERTY_INDEX: u8 = 7;
const OPERAND_COUNT: u8 = 8;

fn write_instruction(out: &mut Vec<u8>, instruction: &Instruction) {
    out.push(opcode_tag(instruction.op));
    match instruction.operand {
        Operand::None => out.push(OPERAND_NONE),
        Operand::Number(n) => {
            out.push(OPERAND_NUMBER);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Operand::StringIndex(i) => {
            out.push(OPERAND_STRING_INDEX);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Operand::Bool(b) => {
            out.push(OPERAND_BOOL);
            out.push(b as u8);
        }
        Operand::VarIndex(i) => {
            out.push(OPERAND_VAR_INDEX);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Operand::JumpTarget(i) => {
            out.push(OPERAND_JUMP_TARGET);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Operand::FunctionIndex(i) => {
            out.push(OPERAND_FUNCTION_INDEX);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Operand::PropertyIndex(i) => {
            out.push(OPERAND_PROPERTY_INDEX);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Operand::Count(i) => {
            out.push(OPERAND_COUNT);
            out.extend_from_slice(&i.to_le_bytes());
        }
    }
}

fn read_instruction(cursor: &mut Cursor) -> Result<Instruction, BytecodeError> {
    let op = opcode_from_tag(cursor.take_u8()?)?;
    let tag = cursor.take_u8()?;
    let operand = match tag {
        OPERAND_NONE => Operand::None,
        OPERAND_NUMBER => Operand::Number(f64::from_le_bytes(cursor.take(8)?.try_into().unwrap())),
        OPERAND_STRING_INDEX => Operand::StringIndex(cursor.take_u16()?),
        OPERAND_BOOL => Operand::Bool(cursor.take_u8()? != 0),
        OPERAND_VAR_INDEX => Operand::VarIndex(cursor.take_u16()?),
        OPERAND_JUMP_TARGET => Operand::JumpTarget(cursor.take_u16()?),
        OPERAND_FUNCTION_INDEX => Operand::FunctionIndex(cursor.take_u16()?),
        OPERAND_PROPERTY_INDEX => Operand::PropertyIndex(cursor.take_u16()?),
        OPERAND_COUNT => Operand::Count(cursor.take_u16()?),
        other => return Err(BytecodeError::MalformedImage(format!("unknown operand tag {other}"))),
    };
    Ok(Instruction { op, operand })
}

fn read_strings(cursor: &mut Cursor, count: u32) -> Result<Vec<String>, BytecodeError> {
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = cursor.take_u32()?;
        let bytes = cursor.take(len as usize)?;
        out.push(
            String::from_utf8(bytes.to_vec())
                .map_err(|_| BytecodeError::MalformedImage("non-UTF-8 pool entry".into()))?,
        );
    }
    Ok(out)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BytecodeError> {
        if self.pos + n > self.bytes.len() {
            return Err(BytecodeError::MalformedImage("unexpected end of image".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, BytecodeError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, BytecodeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn take_u32(&mut self) -> Result<u32, BytecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::program::{Instruction as I, Opcode as Op, Operand as O};
    use proptest::prelude::*;

    #[test]
    fn roundtrip_simple_program() {
        let program = BytecodeProgram {
            instructions: vec![
                I::new(Op::PushNum, O::Number(3.0)),
                I::new(Op::PushNum, O::Number(4.0)),
                I::new(Op::Add, O::None),
                I::new(Op::Halt, O::None),
            ],
            string_pool: vec!["hello".into()],
            variable_names: vec!["x".into()],
            property_names: vec![],
            function_names: vec!["echo".into()],
        };
        let bytes = serialize(&program);
        assert_eq!(deserialize(&bytes).unwrap(), program);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = deserialize(b"nope").unwrap_err();
        assert!(matches!(err, BytecodeError::MalformedImage(_)));
    }

    #[test]
    fn truncated_image_is_rejected() {
        let program = BytecodeProgram {
            instructions: vec![I::new(Op::PushNum, O::Number(1.0))],
            ..Default::default()
        };
        let mut bytes = serialize(&program);
        bytes.truncate(bytes.len() - 2);
        assert!(deserialize(&bytes).is_err());
    }

    fn arb_operand() -> impl Strategy<Value = (Opcode, Operand)> {
        prop_oneof![
            Just((Opcode::Nop, Operand::None)),
            any::<f64>().prop_map(|n| (Opcode::PushNum, Operand::Number(n))),
            any::<u16>().prop_map(|i| (Opcode::PushStr, Operand::StringIndex(i))),
            any::<bool>().prop_map(|b| (Opcode::PushBool, Operand::Bool(b))),
            any::<u16>().prop_map(|i| (Opcode::PushVar, Operand::VarIndex(i))),
            any::<u16>().prop_map(|i| (Opcode::Jump, Operand::JumpTarget(i))),
            any::<u16>().prop_map(|i| (Opcode::Call, Operand::FunctionIndex(i))),
            any::<u16>().prop_map(|i| (Opcode::GetProp, Operand::PropertyIndex(i))),
            any::<u16>().prop_map(|i| (Opcode::NewArray, Operand::Count(i))),
        ]
    }

    proptest! {
        #[test]
        fn roundtrip_is_lossless(ops in prop::collection::vec(arb_operand(), 0..20)) {
            let instructions = ops.into_iter().map(|(op, operand)| Instruction::new(op, operand)).collect();
            let program = BytecodeProgram {
                instructions,
                string_pool: vec!["a".into(), "b".into()],
                variable_names: vec!["v".into()],
                property_names: vec!["p".into()],
                function_names: vec!["f".into()],
            };
            let bytes = serialize(&program);
            let decoded = deserialize(&bytes).unwrap();
            prop_assert_eq!(decoded, program);
        }
    }
}

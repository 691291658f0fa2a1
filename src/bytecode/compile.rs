//! Compile a JSON-described program into a [`BytecodeProgram`] (§4.D).
//!
//! Input shape:
//! ```json
//! {
//!   "instructions": [{"op": "PUSH_NUM", "value": 3.0}, {"op": "ADD"}, ...],
//!   "stringPool": ["..."],
//!   "variableNames": ["..."],
//!   "propertyNames": ["..."],
//!   "functionNames": ["..."]
//! }
//! ```
//! Jump/var/string/property/function operands are plain JSON integers;
//! `compile_json` does not resolve symbolic names, it trusts the indices
//! the caller supplies. Both the camelCase pool keys above and their
//! snake_case equivalents (`string_pool`, `variable_names`, ...) are
//! accepted, as is `operand` alongside `value` per instruction.

use serde_json::Value as Json;

use crate::error::BytecodeError;

use super::program::{BytecodeProgram, Instruction, Opcode, Operand};

/// Compile a JSON document into a [`BytecodeProgram`]. Returns
/// `BytecodeError::CompileError` for an unknown opcode name, a missing or
/// mistyped operand, or a malformed envelope.
pub fn compile_json(source: &Json) -> Result<BytecodeProgram, BytecodeError> {
    let obj = source
        .as_object()
        .ok_or_else(|| BytecodeError::CompileError("program must be a JSON object".into()))?;

    let instructions_json = obj
        .get("instructions")
        .and_then(Json::as_array)
        .ok_or_else(|| BytecodeError::CompileError("missing \"instructions\" array".into()))?;

    let mut instructions = Vec::with_capacity(instructions_json.len());
    for (index, entry) in instructions_json.iter().enumerate() {
        instructions.push(
            compile_instruction(entry)
                .map_err(|e| BytecodeError::CompileError(format!("instruction {index}: {e}")))?,
        );
    }

    Ok(BytecodeProgram {
        instructions,
        string_pool: string_array(obj, "stringPool", "string_pool")?,
        variable_names: string_array(obj, "variableNames", "variable_names")?,
        property_names: string_array(obj, "propertyNames", "property_names")?,
        function_names: string_array(obj, "functionNames", "function_names")?,
    })
}

/// Read a string-array field under either its camelCase (preferred, per the
/// documented wire shape) or snake_case spelling.
fn string_array(obj: &serde_json::Map<String, Json>, key: &str, alt_key: &str) -> Result<Vec<String>, BytecodeError> {
    match obj.get(key).or_else(|| obj.get(alt_key)) {
        None => Ok(Vec::new()),
        Some(Json::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| BytecodeError::CompileError(format!("\"{key}\" entries must be strings")))
            })
            .collect(),
        Some(_) => Err(BytecodeError::CompileError(format!("\"{key}\" must be an array"))),
    }
}

fn compile_instruction(entry: &Json) -> Result<Instruction, String> {
    let obj = entry.as_object().ok_or("instruction must be an object")?;
    let op_name = obj.get("op").and_then(Json::as_str).ok_or("missing \"op\" string")?;
    let op = opcode_from_name(op_name).ok_or_else(|| format!("unknown opcode \"{op_name}\""))?;
    let operand_json = obj.get("value").or_else(|| obj.get("operand"));
    let operand = compile_operand(op, operand_json)?;
    Ok(Instruction::new(op, operand))
}

fn opcode_from_name(name: &str) -> Option<Opcode> {
    Some(match name {
        "NOP" => Opcode::Nop,
        "PUSH_NUM" => Opcode::PushNum,
        "PUSH_STR" => Opcode::PushStr,
        "PUSH_BOOL" => Opcode::PushBool,
        "PUSH_VAR" => Opcode::PushVar,
        "POP" => Opcode::Pop,
        "ADD" => Opcode::Add,
        "SUB" => Opcode::Sub,
        "MUL" => Opcode::Mul,
        "DIV" => Opcode::Div,
        "MOD" => Opcode::Mod,
        "EQ" => Opcode::Eq,
        "NEQ" => Opcode::Neq,
        "GT" => Opcode::Gt,
        "LT" => Opcode::Lt,
        "GTE" => Opcode::Gte,
        "LTE" => Opcode::Lte,
        "AND" => Opcode::And,
        "OR" => Opcode::Or,
        "NOT" => Opcode::Not,
        "JUMP" => Opcode::Jump,
        "JUMP_IF" => Opcode::JumpIf,
        "JUMP_IF_NOT" => Opcode::JumpIfNot,
        "CALL" => Opcode::Call,
        "RETURN" => Opcode::Return,
        "SET_VAR" => Opcode::SetVar,
        "GET_PROP" => Opcode::GetProp,
        "SET_PROP" => Opcode::SetProp,
        "NEW_ARRAY" => Opcode::NewArray,
        "NEW_OBJECT" => Opcode::NewObject,
        "HALT" => Opcode::Halt,
        _ => return None,
    })
}

fn compile_operand(op: Opcode, operand: Option<&Json>) -> Result<Operand, String> {
    let u16_operand = |v: &Json| -> Result<u16, String> {
        v.as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| "operand must be an integer in range 0..65535".to_string())
    };
    match op {
        Opcode::PushNum => {
            let n = operand.and_then(Json::as_f64).ok_or("PUSH_NUM requires a numeric operand")?;
            Ok(Operand::Number(n))
        }
        Opcode::PushStr => Ok(Operand::StringIndex(u16_operand(
            operand.ok_or("PUSH_STR requires an operand")?,
        )?)),
        Opcode::PushBool => {
            let b = operand.and_then(Json::as_bool).ok_or("PUSH_BOOL requires a bool operand")?;
            Ok(Operand::Bool(b))
        }
        Opcode::PushVar | Opcode::SetVar => Ok(Operand::VarIndex(u16_operand(
            operand.ok_or("variable opcode requires an operand")?,
        )?)),
        Opcode::Jump | Opcode::JumpIf | Opcode::JumpIfNot => Ok(Operand::JumpTarget(u16_operand(
            operand.ok_or("jump opcode requires an operand")?,
        )?)),
        Opcode::Call => Ok(Operand::FunctionIndex(u16_operand(
            operand.ok_or("CALL requires an operand")?,
        )?)),
        Opcode::GetProp | Opcode::SetProp => Ok(Operand::PropertyIndex(u16_operand(
            operand.ok_or("property opcode requires an operand")?,
        )?)),
        Opcode::NewArray => Ok(Operand::Count(u16_operand(
            operand.ok_or("NEW_ARRAY requires an operand")?,
        )?)),
        _ => Ok(Operand::None),
    }
}

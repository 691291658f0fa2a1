//! Stack-machine interpreter for [`BytecodeProgram`]s (§4.D).

use crate::error::BytecodeError;
use crate::value::BytecodeValue;

use super::program::{BytecodeProgram, Instruction, Opcode, Operand};

/// A host function callable from bytecode via `CALL`.
///
/// The registry wires this to tool invocation: a `CALL` to `"echo"` looks
/// up `function_names[index]` and dispatches it as a tool call against the
/// registered tool namespace (§4.D).
pub trait HostFunctions {
    /// Invoke the named host function with the given arguments (popped in
    /// declared order, so `args[0]` was pushed first) and return its
    /// result value.
    fn call(&mut self, name: &str, args: Vec<BytecodeValue>) -> Result<BytecodeValue, BytecodeError>;
}

/// A `HostFunctions` implementation that rejects every call; useful for
/// running pure-arithmetic programs in tests without wiring a registry.
pub struct NoHostFunctions;

impl HostFunctions for NoHostFunctions {
    fn call(&mut self, name: &str, _args: Vec<BytecodeValue>) -> Result<BytecodeValue, BytecodeError> {
        Err(BytecodeError::UnknownFunction(name.to_string()))
    }
}

/// Resource limits for one interpreter run (§3, §4.D).
#[derive(Debug, Clone, Copy)]
pub struct BytecodeLimits {
    /// Maximum operand stack depth (default 256).
    pub max_stack_depth: usize,
    /// Maximum instructions executed before `Timeout` (default 100,000).
    pub max_steps: usize,
}

impl Default for BytecodeLimits {
    fn default() -> Self {
        Self {
            max_stack_depth: 256,
            max_steps: 100_000,
        }
    }
}

/// Execute `program` against `vars` (the local variable array, indexed by
/// `variable_index`), dispatching `CALL` through `host`, and return the
/// value `RETURN`/`HALT` left on top of stack. Exceeding `limits.max_steps`
/// fails with `BytecodeError::StepBudgetExceeded`, which callers map to the
/// wire `Timeout` status (§6, §8).
///
/// `vars` is sized to `program.variable_names.len()` and pre-populated by
/// the caller (e.g. from call params) before this is invoked.
pub fn run(
    program: &BytecodeProgram,
    vars: &mut Vec<BytecodeValue>,
    host: &mut dyn HostFunctions,
    limits: BytecodeLimits,
) -> Result<BytecodeValue, BytecodeError> {
    if vars.len() < program.variable_names.len() {
        vars.resize(program.variable_names.len(), BytecodeValue::Null);
    }

    let mut stack: Vec<BytecodeValue> = Vec::new();
    let mut pc: usize = 0;
    let mut steps: usize = 0;

    loop {
        if steps >= limits.max_steps {
            return Err(BytecodeError::StepBudgetExceeded(limits.max_steps));
        }
        let Some(instruction) = program.instructions.get(pc) else {
            // Falling off the end behaves like an implicit RETURN.
            return Ok(stack.pop().unwrap_or(BytecodeValue::Null));
        };
        steps += 1;
        let mut next_pc = pc + 1;

        match execute_one(instruction, program, vars, &mut stack, host, &mut next_pc, limits.max_stack_depth)? {
            Step::Continue => {}
            Step::Return(value) => return Ok(value),
        }
        pc = next_pc;
    }
}

enum Step {
    Continue,
    Return(BytecodeValue),
}

#[allow(clippy::too_many_arguments)]
fn execute_one(
    instruction: &Instruction,
    program: &BytecodeProgram,
    vars: &mut [BytecodeValue],
    stack: &mut Vec<BytecodeValue>,
    host: &mut dyn HostFunctions,
    next_pc: &mut usize,
    max_depth: usize,
) -> Result<Step, BytecodeError> {
    let push = |stack: &mut Vec<BytecodeValue>, v: BytecodeValue| -> Result<(), BytecodeError> {
        if stack.len() >= max_depth {
            return Err(BytecodeError::StackOverflow(max_depth));
        }
        stack.push(v);
        Ok(())
    };
    let pop = |stack: &mut Vec<BytecodeValue>| -> Result<BytecodeValue, BytecodeError> {
        stack.pop().ok_or(BytecodeError::StackUnderflow)
    };

    match instruction.op {
        Opcode::Nop => {}
        Opcode::PushNum => {
            let Operand::Number(n) = instruction.operand else {
                return Err(BytecodeError::TypeError("PUSH_NUM without number operand".into()));
            };
            push(stack, BytecodeValue::Number(n))?;
        }
        Opcode::PushStr => {
            let idx = string_index(&instruction.operand)?;
            let s = pool_get(&program.string_pool, idx, "string")?;
            push(stack, BytecodeValue::String(s.clone()))?;
        }
        Opcode::PushBool => {
            let Operand::Bool(b) = instruction.operand else {
                return Err(BytecodeError::TypeError("PUSH_BOOL without bool operand".into()));
            };
            push(stack, BytecodeValue::Bool(b))?;
        }
        Opcode::PushVar => {
            let idx = var_index(&instruction.operand)?;
            let val = vars
                .get(idx as usize)
                .cloned()
                .ok_or_else(|| invalid_pool("variable", idx, vars.len()))?;
            push(stack, val)?;
        }
        Opcode::Pop => {
            pop(stack)?;
        }
        Opcode::Add => binary_arith(stack, |a, b| Ok(a + b), &push)?,
        Opcode::Sub => binary_arith(stack, |a, b| Ok(a - b), &push)?,
        Opcode::Mul => binary_arith(stack, |a, b| Ok(a * b), &push)?,
        Opcode::Div => binary_arith(
            stack,
            |a, b| if b == 0.0 { Err(BytecodeError::DivisionByZero) } else { Ok(a / b) },
            &push,
        )?,
        Opcode::Mod => binary_arith(
            stack,
            |a, b| if b == 0.0 { Err(BytecodeError::DivisionByZero) } else { Ok(a % b) },
            &push,
        )?,
        Opcode::Eq => {
            let b = pop(stack)?;
            let a = pop(stack)?;
            push(stack, BytecodeValue::Bool(a == b))?;
        }
        Opcode::Neq => {
            let b = pop(stack)?;
            let a = pop(stack)?;
            push(stack, BytecodeValue::Bool(a != b))?;
        }
        Opcode::Gt => binary_cmp(stack, |a, b| a > b, &push)?,
        Opcode::Lt => binary_cmp(stack, |a, b| a < b, &push)?,
        Opcode::Gte => binary_cmp(stack, |a, b| a >= b, &push)?,
        Opcode::Lte => binary_cmp(stack, |a, b| a <= b, &push)?,
        Opcode::And => {
            let b = pop(stack)?;
            let a = pop(stack)?;
            push(stack, BytecodeValue::Bool(a.is_truthy() && b.is_truthy()))?;
        }
        Opcode::Or => {
            let b = pop(stack)?;
            let a = pop(stack)?;
            push(stack, BytecodeValue::Bool(a.is_truthy() || b.is_truthy()))?;
        }
        Opcode::Not => {
            let a = pop(stack)?;
            push(stack, BytecodeValue::Bool(!a.is_truthy()))?;
        }
        Opcode::Jump => {
            *next_pc = jump_target(&instruction.operand, program)?;
        }
        Opcode::JumpIf => {
            let cond = pop(stack)?;
            if cond.is_truthy() {
                *next_pc = jump_target(&instruction.operand, program)?;
            }
        }
        Opcode::JumpIfNot => {
            let cond = pop(stack)?;
            if !cond.is_truthy() {
                *next_pc = jump_target(&instruction.operand, program)?;
            }
        }
        Opcode::Call => {
            let idx = function_index(&instruction.operand)?;
            let name = pool_get(&program.function_names, idx, "function")?.clone();
            // Arguments are pushed by the caller and consumed by an
            // immediately preceding NEW_ARRAY-style bundling; CALL itself
            // takes exactly one value off the stack as its argument list.
            let arg = pop(stack)?;
            let args = match arg {
                BytecodeValue::Array(items) => items,
                other => vec![other],
            };
            let result = host.call(&name, args)?;
            push(stack, result)?;
        }
        Opcode::Return => {
            let value = stack.pop().unwrap_or(BytecodeValue::Null);
            return Ok(Step::Return(value));
        }
        Opcode::SetVar => {
            let idx = var_index(&instruction.operand)?;
            let value = pop(stack)?;
            let slot = vars
                .get_mut(idx as usize)
                .ok_or_else(|| invalid_pool("variable", idx, vars.len()))?;
            *slot = value;
        }
        Opcode::GetProp => {
            let idx = property_index(&instruction.operand)?;
            let name = pool_get(&program.property_names, idx, "property")?.clone();
            let obj = pop(stack)?;
            let BytecodeValue::Object(map) = obj else {
                return Err(BytecodeError::TypeError("GET_PROP on non-object".into()));
            };
            push(stack, map.get(&name).cloned().unwrap_or(BytecodeValue::Null))?;
        }
        Opcode::SetProp => {
            let idx = property_index(&instruction.operand)?;
            let name = pool_get(&program.property_names, idx, "property")?.clone();
            let value = pop(stack)?;
            let obj = pop(stack)?;
            let BytecodeValue::Object(mut map) = obj else {
                return Err(BytecodeError::TypeError("SET_PROP on non-object".into()));
            };
            map.insert(name, value);
            push(stack, BytecodeValue::Object(map))?;
        }
        Opcode::NewArray => {
            let count = match instruction.operand {
                Operand::Count(n) => n as usize,
                _ => return Err(BytecodeError::TypeError("NEW_ARRAY without count operand".into())),
            };
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(pop(stack)?);
            }
            items.reverse();
            push(stack, BytecodeValue::Array(items))?;
        }
        Opcode::NewObject => {
            push(stack, BytecodeValue::Object(Default::default()))?;
        }
        Opcode::Halt => {
            let value = stack.pop().unwrap_or(BytecodeValue::Null);
            return Ok(Step::Return(value));
        }
    }
    Ok(Step::Continue)
}

fn binary_arith(
    stack: &mut Vec<BytecodeValue>,
    op: impl Fn(f64, f64) -> Result<f64, BytecodeError>,
    push: &impl Fn(&mut Vec<BytecodeValue>, BytecodeValue) -> Result<(), BytecodeError>,
) -> Result<(), BytecodeError> {
    let b = stack.pop().ok_or(BytecodeError::StackUnderflow)?;
    let a = stack.pop().ok_or(BytecodeError::StackUnderflow)?;
    let (BytecodeValue::Number(a), BytecodeValue::Number(b)) = (a, b) else {
        return Err(BytecodeError::TypeError("arithmetic on non-number".into()));
    };
    push(stack, BytecodeValue::Number(op(a, b)?))
}

fn binary_cmp(
    stack: &mut Vec<BytecodeValue>,
    op: impl Fn(f64, f64) -> bool,
    push: &impl Fn(&mut Vec<BytecodeValue>, BytecodeValue) -> Result<(), BytecodeError>,
) -> Result<(), BytecodeError> {
    let b = stack.pop().ok_or(BytecodeError::StackUnderflow)?;
    let a = stack.pop().ok_or(BytecodeError::StackUnderflow)?;
    let (BytecodeValue::Number(a), BytecodeValue::Number(b)) = (a, b) else {
        return Err(BytecodeError::TypeError("comparison on non-number".into()));
    };
    push(stack, BytecodeValue::Bool(op(a, b)))
}

fn jump_target(operand: &Operand, program: &BytecodeProgram) -> Result<usize, BytecodeError> {
    let Operand::JumpTarget(addr) = *operand else {
        return Err(BytecodeError::TypeError("jump without jump-target operand".into()));
    };
    if addr as usize > program.instructions.len() {
        return Err(BytecodeError::InvalidJumpTarget(addr));
    }
    Ok(addr as usize)
}

fn string_index(operand: &Operand) -> Result<u16, BytecodeError> {
    match operand {
        Operand::StringIndex(i) => Ok(*i),
        _ => Err(BytecodeError::TypeError("expected string-pool index operand".into())),
    }
}
fn var_index(operand: &Operand) -> Result<u16, BytecodeError> {
    match operand {
        Operand::VarIndex(i) => Ok(*i),
        _ => Err(BytecodeError::TypeError("expected variable index operand".into())),
    }
}
fn function_index(operand: &Operand) -> Result<u16, BytecodeError> {
    match operand {
        Operand::FunctionIndex(i) => Ok(*i),
        _ => Err(BytecodeError::TypeError("expected function index operand".into())),
    }
}
fn property_index(operand: &Operand) -> Result<u16, BytecodeError> {
    match operand {
        Operand::PropertyIndex(i) => Ok(*i),
        _ => Err(BytecodeError::TypeError("expected property index operand".into())),
    }
}

fn pool_get<'a>(pool: &'a [String], idx: u16, kind: &'static str) -> Result<&'a String, BytecodeError> {
    pool.get(idx as usize).ok_or_else(|| invalid_pool(kind, idx, pool.len()))
}

fn invalid_pool(kind: &'static str, index: u16, len: usize) -> BytecodeError {
    BytecodeError::InvalidPoolIndex { kind, index, len }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::program::{Instruction as I, Opcode as Op, Operand as O};

    fn exec(program: &BytecodeProgram, limits: BytecodeLimits) -> Result<BytecodeValue, BytecodeError> {
        let mut vars = vec![BytecodeValue::Null; program.variable_names.len()];
        run(program, &mut vars, &mut NoHostFunctions, limits)
    }

    #[test]
    fn arithmetic_addition() {
        let program = BytecodeProgram {
            instructions: vec![
                I::new(Op::PushNum, O::Number(3.0)),
                I::new(Op::PushNum, O::Number(4.0)),
                I::new(Op::Add, O::None),
                I::new(Op::Halt, O::None),
            ],
            ..Default::default()
        };
        assert_eq!(exec(&program, BytecodeLimits::default()).unwrap(), BytecodeValue::Number(7.0));
    }

    #[test]
    fn subtraction_uses_second_op_top() {
        let program = BytecodeProgram {
            instructions: vec![
                I::new(Op::PushNum, O::Number(10.0)),
                I::new(Op::PushNum, O::Number(3.0)),
                I::new(Op::Sub, O::None),
                I::new(Op::Halt, O::None),
            ],
            ..Default::default()
        };
        assert_eq!(exec(&program, BytecodeLimits::default()).unwrap(), BytecodeValue::Number(7.0));
    }

    #[test]
    fn division_by_zero_is_execution_error() {
        let program = BytecodeProgram {
            instructions: vec![
                I::new(Op::PushNum, O::Number(1.0)),
                I::new(Op::PushNum, O::Number(0.0)),
                I::new(Op::Div, O::None),
            ],
            ..Default::default()
        };
        let err = exec(&program, BytecodeLimits::default()).unwrap_err();
        assert!(matches!(err, BytecodeError::DivisionByZero));
    }

    #[test]
    fn infinite_jump_hits_timeout() {
        let program = BytecodeProgram {
            instructions: vec![I::new(Op::Jump, O::JumpTarget(0))],
            ..Default::default()
        };
        let limits = BytecodeLimits {
            max_stack_depth: 256,
            max_steps: 10,
        };
        let err = exec(&program, limits).unwrap_err();
        assert!(matches!(err, BytecodeError::StepBudgetExceeded(10)));
    }

    #[test]
    fn stack_overflow_detected() {
        let mut instructions = vec![];
        for _ in 0..300 {
            instructions.push(I::new(Op::PushNum, O::Number(1.0)));
        }
        let program = BytecodeProgram {
            instructions,
            ..Default::default()
        };
        let err = exec(&program, BytecodeLimits::default()).unwrap_err();
        assert!(matches!(err, BytecodeError::StackOverflow(256)));
    }

    #[test]
    fn pop_from_empty_stack_is_underflow() {
        let program = BytecodeProgram {
            instructions: vec![I::new(Op::Pop, O::None)],
            ..Default::default()
        };
        let err = exec(&program, BytecodeLimits::default()).unwrap_err();
        assert!(matches!(err, BytecodeError::StackUnderflow));
    }

    #[test]
    fn comparison_and_boolean_ops() {
        let program = BytecodeProgram {
            instructions: vec![
                I::new(Op::PushNum, O::Number(3.0)),
                I::new(Op::PushNum, O::Number(4.0)),
                I::new(Op::Lt, O::None),
                I::new(Op::Halt, O::None),
            ],
            ..Default::default()
        };
        assert_eq!(exec(&program, BytecodeLimits::default()).unwrap(), BytecodeValue::Bool(true));
    }

    #[test]
    fn variables_set_and_get() {
        let program = BytecodeProgram {
            instructions: vec![
                I::new(Op::PushNum, O::Number(5.0)),
                I::new(Op::SetVar, O::VarIndex(0)),
                I::new(Op::PushVar, O::VarIndex(0)),
                I::new(Op::Halt, O::None),
            ],
            variable_names: vec!["x".into()],
            ..Default::default()
        };
        assert_eq!(exec(&program, BytecodeLimits::default()).unwrap(), BytecodeValue::Number(5.0));
    }

    #[test]
    fn conditional_jump_if_not_skips_falsy() {
        let program = BytecodeProgram {
            instructions: vec![
                I::new(Op::PushBool, O::Bool(false)),
                I::new(Op::JumpIfNot, O::JumpTarget(3)),
                I::new(Op::PushNum, O::Number(1.0)),
                I::new(Op::PushNum, O::Number(2.0)),
                I::new(Op::Halt, O::None),
            ],
            ..Default::default()
        };
        assert_eq!(exec(&program, BytecodeLimits::default()).unwrap(), BytecodeValue::Number(2.0));
    }

    #[test]
    fn falling_off_the_end_returns_implicit_null() {
        let program = BytecodeProgram {
            instructions: vec![I::new(Op::PushNum, O::Number(1.0)), I::new(Op::Pop, O::None)],
            ..Default::default()
        };
        assert_eq!(exec(&program, BytecodeLimits::default()).unwrap(), BytecodeValue::Null);
    }

    struct RecorderHost {
        calls: Vec<(String, Vec<BytecodeValue>)>,
    }
    impl HostFunctions for RecorderHost {
        fn call(&mut self, name: &str, args: Vec<BytecodeValue>) -> Result<BytecodeValue, BytecodeError> {
            self.calls.push((name.to_string(), args.clone()));
            Ok(BytecodeValue::Number(args.len() as f64))
        }
    }

    #[test]
    fn call_dispatches_to_host_function() {
        let program = BytecodeProgram {
            instructions: vec![
                I::new(Op::PushNum, O::Number(42.0)),
                I::new(Op::Call, O::FunctionIndex(0)),
                I::new(Op::Halt, O::None),
            ],
            function_names: vec!["echo".into()],
            ..Default::default()
        };
        let mut host = RecorderHost { calls: vec![] };
        let mut vars = vec![];
        let result = run(&program, &mut vars, &mut host, BytecodeLimits::default()).unwrap();
        assert_eq!(result, BytecodeValue::Number(1.0));
        assert_eq!(host.calls[0].0, "echo");
    }

    #[test]
    fn unknown_pool_index_is_invalid_pool_index_error() {
        let program = BytecodeProgram {
            instructions: vec![I::new(Op::PushStr, O::StringIndex(5))],
            ..Default::default()
        };
        let err = exec(&program, BytecodeLimits::default()).unwrap_err();
        assert!(matches!(err, BytecodeError::InvalidPoolIndex { kind: "string", .. }));
    }
}

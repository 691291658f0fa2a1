//! The bytecode subsystem: program representation, interpreter, binary
//! serialization, and JSON compilation (§4.D).

mod compile;
mod interpreter;
mod program;
mod serialize;

pub use compile::compile_json;
pub use interpreter::{run, BytecodeLimits, HostFunctions, NoHostFunctions};
pub use program::{BytecodeProgram, Instruction, Opcode, Operand};
pub use serialize::{deserialize, serialize};

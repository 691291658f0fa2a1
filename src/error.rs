//! Error types for each component, plus the wire status code mapping.

use thiserror::Error;

/// Wire status codes (§6). Exact integers, stable across internal naming
/// changes — the wire contract is the integer, not the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    /// The call succeeded.
    Success = 0,
    /// Generic failure.
    Error = 1,
    /// The request's parameters were invalid or missing.
    InvalidParams = 2,
    /// The named tool/driver/verb does not exist.
    NotFound = 3,
    /// Execution of the tool/program failed.
    ExecutionError = 4,
    /// The caller is not permitted to invoke this tool.
    PermissionDenied = 5,
    /// Execution exceeded its step or time budget.
    Timeout = 6,
    /// The implementation kind is recognized but not runnable yet.
    NotImplemented = 7,
}

impl StatusCode {
    /// The wire integer for this status.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Whether this status represents a successful call.
    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

/// Errors from the execution context (§4.C).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ContextError {
    /// A `${var}` or `${var.path}` reference in a template could not be resolved.
    #[error("unresolved variable: {0}")]
    UnresolvedVariable(String),

    /// The context's variable capacity has been exhausted.
    #[error("context capacity exhausted (max {0})")]
    CapacityExceeded(usize),

    /// A composite/bytecode tool re-entered itself, directly or transitively.
    #[error("tool recursion: {0}")]
    Recursion(String),
}

/// Errors from the bytecode interpreter (§4.D).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// The operand stack overflowed its configured max depth.
    #[error("stack overflow (max depth {0})")]
    StackOverflow(usize),

    /// Popped from an empty operand stack.
    #[error("stack underflow")]
    StackUnderflow,

    /// Division (or modulo) by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// An operand index referenced a pool slot that does not exist.
    #[error("invalid pool index: {kind} index {index} out of bounds (len {len})")]
    InvalidPoolIndex {
        /// Which pool was indexed (string/variable/property/function).
        kind: &'static str,
        /// The offending index.
        index: u16,
        /// The pool's actual length.
        len: usize,
    },

    /// A jump address fell outside the instruction stream.
    #[error("invalid jump target: {0}")]
    InvalidJumpTarget(u16),

    /// The instruction-count budget was exceeded.
    #[error("exceeded instruction budget of {0}")]
    StepBudgetExceeded(usize),

    /// A called host function is not registered.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Host function invocation failed.
    #[error("function call failed: {0}")]
    CallFailed(String),

    /// A value was used where its type does not support the operation.
    #[error("type error: {0}")]
    TypeError(String),

    /// The binary serialization format is malformed.
    #[error("malformed bytecode image: {0}")]
    MalformedImage(String),

    /// JSON compilation input was malformed or used an unknown opcode.
    #[error("compile error: {0}")]
    CompileError(String),
}

/// Errors from the tool registry (§4.E).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ToolError {
    /// A tool with this name is already registered.
    #[error("tool already exists: {0}")]
    AlreadyExists(String),

    /// No free registry slot remained.
    #[error("tool registry is full (capacity {0})")]
    Full(usize),

    /// No tool with this name is registered.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The request envelope or tool parameters were invalid.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Execution of the tool body failed.
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// Propagated from the execution context.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Propagated from the bytecode interpreter.
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),

    /// Propagated from the persistent KV store.
    #[error(transparent)]
    Kv(#[from] KvError),
}

/// Errors from the driver manager and bridge (§4.G, §4.H).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DriverError {
    /// A driver with this id is already registered.
    #[error("driver already exists: {0}")]
    AlreadyExists(String),

    /// No driver with this id is registered.
    #[error("driver not found: {0}")]
    NotFound(String),

    /// The driver has no mapping for the requested verb.
    #[error("no mapping for verb '{verb}' on driver '{driver}'")]
    UnmappedVerb {
        /// The driver id.
        driver: String,
        /// The requested verb name.
        verb: String,
    },

    /// An operation that requires `initialized = true` was attempted on an
    /// uninitialized (or deinitialized) driver.
    #[error("driver '{0}' is not initialized")]
    NotInitialized(String),

    /// The native driver function returned a failure.
    #[error("driver call failed: {0}")]
    CallFailed(String),

    /// The JSON payload could not be adapted to the native argument shape.
    #[error("argument adaptation failed: {0}")]
    BadArguments(String),
}

/// Errors from the auth manager (§4.I).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AuthError {
    /// The caller's credentials did not satisfy the configured policy.
    #[error("permission denied")]
    PermissionDenied,

    /// The requested auth method/token combination is malformed.
    #[error("invalid auth config: {0}")]
    InvalidConfig(String),
}

/// Errors from the persistent KV store contract (component B, external).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum KvError {
    /// No value is stored under this key.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The backend is unreachable. Fatal at init per §7.
    #[error("kv backend unreachable: {0}")]
    Unavailable(String),

    /// The backend rejected the write (e.g. out of space).
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Stored bytes could not be decoded as the expected payload.
    #[error("corrupt value for key '{key}': {reason}")]
    Corrupt {
        /// The offending key.
        key: String,
        /// Why decoding failed.
        reason: String,
    },
}

/// Top-level error returned by [`crate::runtime::Runtime::dispatch`].
///
/// Carries enough information to render the wire error envelope
/// (`{"error": true, "code": <int>, "message": "<text>"}`) from §6.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum McpError {
    /// The request envelope itself was malformed (missing `tool` field, etc.).
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Propagated from the tool registry / composite executor / bytecode path.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Propagated from the driver bridge.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Propagated from the auth gate.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl McpError {
    /// The wire status this error maps to, per §6 and §7's propagation policy.
    pub fn status(&self) -> StatusCode {
        match self {
            McpError::MalformedRequest(_) => StatusCode::InvalidParams,
            McpError::Auth(_) => StatusCode::PermissionDenied,
            McpError::Driver(DriverError::NotFound(_) | DriverError::UnmappedVerb { .. }) => {
                StatusCode::NotFound
            }
            McpError::Driver(DriverError::NotInitialized(_)) => StatusCode::ExecutionError,
            McpError::Driver(_) => StatusCode::ExecutionError,
            McpError::Tool(ToolError::AlreadyExists(_) | ToolError::Full(_)) => StatusCode::Error,
            McpError::Tool(ToolError::NotFound(_)) => StatusCode::NotFound,
            McpError::Tool(ToolError::InvalidParams(_)) => StatusCode::InvalidParams,
            McpError::Tool(ToolError::Bytecode(BytecodeError::StepBudgetExceeded(_))) => {
                StatusCode::Timeout
            }
            McpError::Tool(_) => StatusCode::ExecutionError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_wire_integers() {
        assert_eq!(StatusCode::Success.code(), 0);
        assert_eq!(StatusCode::Error.code(), 1);
        assert_eq!(StatusCode::InvalidParams.code(), 2);
        assert_eq!(StatusCode::NotFound.code(), 3);
        assert_eq!(StatusCode::ExecutionError.code(), 4);
        assert_eq!(StatusCode::PermissionDenied.code(), 5);
        assert_eq!(StatusCode::Timeout.code(), 6);
        assert_eq!(StatusCode::NotImplemented.code(), 7);
    }

    #[test]
    fn budget_exceeded_maps_to_timeout() {
        let err = McpError::Tool(ToolError::Bytecode(BytecodeError::StepBudgetExceeded(100)));
        assert_eq!(err.status(), StatusCode::Timeout);
    }

    #[test]
    fn already_exists_maps_to_error_not_invalid_params() {
        let err = McpError::Tool(ToolError::AlreadyExists("echo".into()));
        assert_eq!(err.status(), StatusCode::Error);
    }

    #[test]
    fn division_by_zero_message_mentions_division() {
        let err = BytecodeError::DivisionByZero;
        assert!(err.to_string().contains("division"));
    }
}

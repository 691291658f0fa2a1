//! Core runtime for an embedded Model Context Protocol server: a
//! fixed-capacity tool/driver registry, a composite-tool execution engine,
//! a portable bytecode interpreter, native driver bridging, and an auth
//! gate, all wired together behind [`runtime::Runtime`].
//!
//! The platform layer (flash I/O, real hardware drivers, wall-clock time,
//! the JSON transport itself) lives outside this crate; everything here
//! operates on already-parsed [`serde_json::Value`] envelopes and a
//! [`kv::KvStore`] trait object the host supplies.

pub mod auth;
pub mod bytecode;
pub mod composite;
pub mod context;
pub mod device_info;
pub mod driver;
pub mod error;
pub mod json;
pub mod kv;
pub mod registry;
pub mod runtime;
pub mod secret;
pub mod tool;
pub mod value;

pub use error::{AuthError, BytecodeError, ContextError, DriverError, KvError, McpError, StatusCode, ToolError};
pub use runtime::{Runtime, RuntimeConfig};
pub use value::ToolResult;

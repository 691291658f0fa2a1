//! Tool data model (§3): definitions, kinds, and composite steps.

use serde::{Deserialize, Serialize};

use crate::value::ToolResult;

/// A native handler: `(request_json) -> ToolResult` (§3 "Native").
///
/// Boxed rather than a bare `fn` pointer so closures capturing host state
/// (e.g. a recorder in tests, a device-info snapshot) can register as
/// native tools.
pub type NativeHandler = Box<dyn Fn(&serde_json::Value) -> ToolResult + Send + Sync>;

/// One step of a composite tool (§3, §4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// The sub-tool to invoke.
    pub tool_name: String,
    /// A JSON-with-`${var}`-tokens template, substituted per invocation to
    /// form the sub-tool's `params`.
    pub params_template: String,
    /// If set, the step's result JSON is bound under this name in the
    /// context for later steps to reference.
    pub result_store: Option<String>,
}

/// The reserved-for-later scripting implementation (§3 "Script").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptBody {
    /// The scripting language name, informational only.
    pub language: String,
    /// The script source, informational only.
    pub source: String,
}

/// The tagged implementation payload of a [`ToolDefinition`] (§3).
pub enum ToolImpl {
    /// A Rust-native handler.
    Native(NativeHandler),
    /// An ordered sub-tool call sequence.
    Composite(Vec<Step>),
    /// Reserved; always dispatches to `NotImplemented`.
    Script(ScriptBody),
    /// A portable stack-machine program.
    Bytecode(crate::bytecode::BytecodeProgram),
}

impl ToolImpl {
    /// The `kind` tag this implementation corresponds to (§3).
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolImpl::Native(_) => ToolKind::Native,
            ToolImpl::Composite(_) => ToolKind::Composite,
            ToolImpl::Script(_) => ToolKind::Script,
            ToolImpl::Bytecode(_) => ToolKind::Bytecode,
        }
    }
}

/// The four implementation kinds a tool may have (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolKind {
    /// Rust-native handler.
    Native,
    /// Ordered sub-tool call sequence.
    Composite,
    /// Reserved scripting language.
    Script,
    /// Bytecode stack-machine program.
    Bytecode,
}

impl ToolKind {
    /// The JSON `type` string used by `list()` and `register_dynamic`'s
    /// `implementationType` field (§4.E).
    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::Native => "native",
            ToolKind::Composite => "composite",
            ToolKind::Script => "script",
            ToolKind::Bytecode => "bytecode",
        }
    }

    /// Parse `implementationType`/`type` strings, case-sensitively matching
    /// [`ToolKind::as_str`]'s output.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "native" => Some(ToolKind::Native),
            "composite" => Some(ToolKind::Composite),
            "script" => Some(ToolKind::Script),
            "bytecode" => Some(ToolKind::Bytecode),
            _ => None,
        }
    }
}

/// A registered tool (§3).
pub struct ToolDefinition {
    /// Unique name (≤ 64 chars).
    pub name: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// Opaque JSON-schema-ish validation input, passed verbatim to
    /// `validate_schema`.
    pub schema: Option<String>,
    /// The tagged implementation payload.
    pub implementation: ToolImpl,
    /// Whether this definition arrived via `register_dynamic` rather than
    /// the static `register`.
    pub is_dynamic: bool,
    /// Whether successful registration/update writes this definition to
    /// the KV store.
    pub persistent: bool,
    /// Unix-epoch seconds at registration time, supplied by the caller
    /// (the core has no clock of its own; §1 keeps platform services
    /// external).
    pub creation_time: i64,
}

impl ToolDefinition {
    /// The `kind` tag, derived from the implementation payload.
    pub fn kind(&self) -> ToolKind {
        self.implementation.kind()
    }

    /// The `{name, description?, hasSchema, isDynamic, type}` summary used
    /// by `list()` (§4.E).
    pub fn summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "hasSchema": self.schema.is_some(),
            "isDynamic": self.is_dynamic,
            "type": self.kind().as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_kind_strings_roundtrip() {
        for kind in [ToolKind::Native, ToolKind::Composite, ToolKind::Script, ToolKind::Bytecode] {
            assert_eq!(ToolKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn unknown_kind_string_is_none() {
        assert_eq!(ToolKind::from_str("nonsense"), None);
    }

    #[test]
    fn summary_json_reflects_kind_and_schema() {
        let def = ToolDefinition {
            name: "echo".into(),
            description: None,
            schema: Some("{}".into()),
            implementation: ToolImpl::Composite(vec![]),
            is_dynamic: true,
            persistent: false,
            creation_time: 0,
        };
        let summary = def.summary_json();
        assert_eq!(summary["type"], "composite");
        assert_eq!(summary["hasSchema"], true);
        assert_eq!(summary["isDynamic"], true);
    }
}

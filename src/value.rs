//! Shared value types: [`Value`] (execution-context variables),
//! [`BytecodeValue`] (VM operand stack), and [`ToolResult`] (§3 data model).

use std::collections::BTreeMap;

use crate::error::StatusCode;

/// A variable stored in an [`crate::context::ExecutionContext`].
///
/// Contexts hold a small, fixed set of kinds (§4.C) — strings, numbers,
/// bools, opaque JSON blobs, and prior tool results — rather than arbitrary
/// Rust types, since the only operation performed on them is textual
/// substitution into a template.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A string variable.
    String(String),
    /// A numeric variable.
    Number(f64),
    /// A boolean variable.
    Bool(bool),
    /// An opaque JSON blob (object or array).
    Json(serde_json::Value),
    /// The result of a prior tool invocation, bound by a composite step's
    /// `result_store` name.
    ToolResult(ToolResult),
}

impl Value {
    /// Render this value the way `${var}` substitution would: strings are
    /// JSON-quoted, numbers/bools unquoted, objects/arrays inlined as JSON.
    pub fn render(&self) -> String {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()).to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::Bool(b) => b.to_string(),
            Value::Json(v) => v.to_string(),
            Value::ToolResult(r) => r.result_json.to_string(),
        }
    }

    /// Look up a dotted path (`foo.bar.baz`) within this value, returning a
    /// rendered string. Used for `${var.path}` substitution.
    pub fn render_path(&self, path: &[&str]) -> Option<String> {
        if path.is_empty() {
            return Some(self.render());
        }
        let root = match self {
            Value::Json(v) => v.clone(),
            Value::ToolResult(r) => r.result_json.clone(),
            _ => return None,
        };
        let mut cur = &root;
        for segment in path {
            cur = cur.get(segment)?;
        }
        Some(match cur {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Status + payload returned by any tool invocation (§3, §6).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// The call's outcome.
    pub status: StatusCode,
    /// JSON result body (the tool-defined success payload, or the
    /// `{"error": true, "code": ..., "message": ...}` envelope on failure).
    pub result_json: serde_json::Value,
    /// Optional raw binary payload (e.g. for drivers returning blobs).
    pub result_data: Option<Vec<u8>>,
}

impl ToolResult {
    /// Build a successful result from a JSON body.
    pub fn success(result_json: serde_json::Value) -> Self {
        Self {
            status: StatusCode::Success,
            result_json,
            result_data: None,
        }
    }

    /// Build an error result with the given status and message, following
    /// the wire error envelope shape from §6.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status,
            result_json: serde_json::json!({
                "error": true,
                "code": status.code(),
                "message": message,
            }),
            result_data: None,
        }
    }

    /// The size in bytes of `result_data`, or 0 if absent — the
    /// `result_data_size` field from §3's `ToolResult`.
    pub fn result_data_size(&self) -> usize {
        self.result_data.as_ref().map_or(0, Vec::len)
    }
}

/// A value on the bytecode interpreter's operand stack (§3, §4.D).
///
/// Strings and arrays own their contents; the stack machine clones on
/// duplication rather than sharing pointers (Design Notes §9).
#[derive(Debug, Clone, PartialEq)]
pub enum BytecodeValue {
    /// The absence of a value.
    Null,
    /// A floating-point number.
    Number(f64),
    /// An owned string.
    String(String),
    /// A boolean.
    Bool(bool),
    /// An opaque key/value object.
    Object(BTreeMap<String, BytecodeValue>),
    /// An array of values.
    Array(Vec<BytecodeValue>),
}

impl BytecodeValue {
    /// Falsy per §4.D: `Null`, `false`, zero, and the empty string are
    /// falsy; everything else (including empty arrays/objects) is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            BytecodeValue::Null => false,
            BytecodeValue::Bool(b) => *b,
            BytecodeValue::Number(n) => *n != 0.0,
            BytecodeValue::String(s) => !s.is_empty(),
            BytecodeValue::Object(_) | BytecodeValue::Array(_) => true,
        }
    }

    /// Convert to `serde_json::Value` for handing a result back over the
    /// wire or into an [`crate::context::ExecutionContext`].
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            BytecodeValue::Null => serde_json::Value::Null,
            BytecodeValue::Number(n) => serde_json::json!(n),
            BytecodeValue::String(s) => serde_json::Value::String(s.clone()),
            BytecodeValue::Bool(b) => serde_json::Value::Bool(*b),
            BytecodeValue::Object(map) => {
                serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            BytecodeValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(BytecodeValue::to_json).collect())
            }
        }
    }

    /// Build a `BytecodeValue` from `serde_json::Value`, for seeding a
    /// program's variables from call params.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => BytecodeValue::Null,
            serde_json::Value::Bool(b) => BytecodeValue::Bool(*b),
            serde_json::Value::Number(n) => BytecodeValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => BytecodeValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                BytecodeValue::Array(items.iter().map(BytecodeValue::from_json).collect())
            }
            serde_json::Value::Object(map) => BytecodeValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), BytecodeValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_render_quotes_strings() {
        assert_eq!(Value::String("hi".into()).render(), "\"hi\"");
    }

    #[test]
    fn value_render_numbers_unquoted() {
        assert_eq!(Value::Number(7.0).render(), "7");
        assert_eq!(Value::Number(7.5).render(), "7.5");
    }

    #[test]
    fn value_render_path_into_tool_result() {
        let result = ToolResult::success(serde_json::json!({"v": 42}));
        let value = Value::ToolResult(result);
        assert_eq!(value.render_path(&["v"]).as_deref(), Some("42"));
    }

    #[test]
    fn tool_result_error_matches_wire_envelope() {
        let r = ToolResult::error(StatusCode::NotFound, "missing");
        assert_eq!(
            r.result_json,
            serde_json::json!({"error": true, "code": 3, "message": "missing"})
        );
    }

    #[test]
    fn bytecode_value_truthiness() {
        assert!(!BytecodeValue::Null.is_truthy());
        assert!(!BytecodeValue::Number(0.0).is_truthy());
        assert!(!BytecodeValue::String(String::new()).is_truthy());
        assert!(BytecodeValue::Bool(true).is_truthy());
        assert!(BytecodeValue::Array(vec![]).is_truthy());
    }

    #[test]
    fn bytecode_value_json_roundtrip() {
        let json = serde_json::json!({"a": 1, "b": [true, null, "x"]});
        let bv = BytecodeValue::from_json(&json);
        assert_eq!(bv.to_json(), json);
    }
}

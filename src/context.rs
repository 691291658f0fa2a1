//! Per-invocation execution context: variable store + template substitution
//! (§4.C), plus the active-tool recursion guard used by the composite
//! executor (§4.F).

use std::collections::HashSet;

use crate::error::ContextError;
use crate::value::Value;

/// Configuration for a freshly created [`ExecutionContext`].
#[derive(Debug, Clone, Copy)]
pub struct ContextConfig {
    /// Maximum number of variables the context may hold (default 32, §3).
    pub capacity: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { capacity: 32 }
    }
}

/// A named variable store created per composite/script/bytecode invocation,
/// destroyed at the end of that invocation (§3 "Lifecycles").
pub struct ExecutionContext {
    vars: Vec<(String, Value)>,
    capacity: usize,
}

impl ExecutionContext {
    /// Create a new, empty context with the given configuration. `parent`
    /// is accepted for API symmetry with §4.C's `create(name, parent?,
    /// capacity)` contract; contexts do not currently inherit variables
    /// from a parent — each composite/bytecode invocation gets a fresh
    /// scope (§3 "Contexts are created per composite invocation ...
    /// not shared").
    pub fn create(config: ContextConfig) -> Self {
        Self {
            vars: Vec::new(),
            capacity: config.capacity,
        }
    }

    /// Look up a variable by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Store (or overwrite) a variable. Fails `ContextError::CapacityExceeded`
    /// if the context is full and `name` is not already present.
    pub fn put(&mut self, name: impl Into<String>, value: Value) -> Result<(), ContextError> {
        let name = name.into();
        if let Some(slot) = self.vars.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
            return Ok(());
        }
        if self.vars.len() >= self.capacity {
            return Err(ContextError::CapacityExceeded(self.capacity));
        }
        self.vars.push((name, value));
        Ok(())
    }

    /// Bind a tool result under `name`, per composite step `result_store`.
    pub fn store_tool_result(
        &mut self,
        name: impl Into<String>,
        result: crate::value::ToolResult,
    ) -> Result<(), ContextError> {
        self.put(name, Value::ToolResult(result))
    }

    /// Substitute `${var}` and `${var.path}` tokens in `template` with the
    /// textual representation of the referenced value. Fails
    /// `ContextError::UnresolvedVariable` if any token cannot be resolved.
    pub fn substitute(&self, template: &str) -> Result<String, ContextError> {
        let mut out = String::with_capacity(template.len());
        let bytes = template.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
                let close = template[i + 2..]
                    .find('}')
                    .map(|p| i + 2 + p)
                    .ok_or_else(|| ContextError::UnresolvedVariable(template[i..].to_string()))?;
                let token = &template[i + 2..close];
                let mut parts = token.split('.');
                let var_name = parts.next().unwrap_or("");
                let path: Vec<&str> = parts.collect();
                let value = self
                    .get(var_name)
                    .ok_or_else(|| ContextError::UnresolvedVariable(token.to_string()))?;
                let rendered = value
                    .render_path(&path)
                    .ok_or_else(|| ContextError::UnresolvedVariable(token.to_string()))?;
                out.push_str(&rendered);
                i = close + 1;
            } else {
                let ch = template[i..].chars().next().expect("i is a char boundary within bounds");
                out.push(ch);
                i += ch.len_utf8();
            }
        }
        Ok(out)
    }
}

/// Tracks which composite tools are currently executing, across the whole
/// chain of nested invocations rather than within a single
/// [`ExecutionContext`] — a composite invocation creates a fresh context
/// per call (§3), but self-recursion must be caught across that whole
/// chain (§4.F), so the guard is threaded explicitly alongside each
/// context instead of living inside it.
#[derive(Debug, Default)]
pub struct RecursionGuard {
    active: HashSet<String>,
}

impl RecursionGuard {
    /// A guard with nothing active.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `tool_name` as actively executing, failing if it is already
    /// active (direct or transitive self-recursion).
    pub fn enter(&mut self, tool_name: &str) -> Result<(), ContextError> {
        if !self.active.insert(tool_name.to_string()) {
            return Err(ContextError::Recursion(tool_name.to_string()));
        }
        Ok(())
    }

    /// Release the marker set by [`RecursionGuard::enter`].
    pub fn exit(&mut self, tool_name: &str) {
        self.active.remove(tool_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ToolResult;
    use serde_json::json;

    #[test]
    fn put_and_get_roundtrip() {
        let mut ctx = ExecutionContext::create(ContextConfig::default());
        ctx.put("x", Value::Number(7.0)).unwrap();
        assert_eq!(ctx.get("x"), Some(&Value::Number(7.0)));
    }

    #[test]
    fn capacity_exhaustion_fails_put() {
        let mut ctx = ExecutionContext::create(ContextConfig { capacity: 1 });
        ctx.put("a", Value::Bool(true)).unwrap();
        let err = ctx.put("b", Value::Bool(false)).unwrap_err();
        assert!(matches!(err, ContextError::CapacityExceeded(1)));
    }

    #[test]
    fn overwriting_existing_var_does_not_consume_capacity() {
        let mut ctx = ExecutionContext::create(ContextConfig { capacity: 1 });
        ctx.put("a", Value::Bool(true)).unwrap();
        ctx.put("a", Value::Bool(false)).unwrap();
        assert_eq!(ctx.get("a"), Some(&Value::Bool(false)));
    }

    #[test]
    fn substitute_simple_variable() {
        let mut ctx = ExecutionContext::create(ContextConfig::default());
        ctx.put("x", Value::Number(7.0)).unwrap();
        assert_eq!(
            ctx.substitute("{\"v\":${x}}").unwrap(),
            "{\"v\":7}"
        );
    }

    #[test]
    fn substitute_string_is_json_quoted() {
        let mut ctx = ExecutionContext::create(ContextConfig::default());
        ctx.put("name", Value::String("led1".into())).unwrap();
        assert_eq!(ctx.substitute("${name}").unwrap(), "\"led1\"");
    }

    #[test]
    fn substitute_dotted_path_into_tool_result() {
        let mut ctx = ExecutionContext::create(ContextConfig::default());
        ctx.store_tool_result("a", ToolResult::success(json!({"v": 7})))
            .unwrap();
        assert_eq!(ctx.substitute("{\"v\":${a.v}}").unwrap(), "{\"v\":7}");
    }

    #[test]
    fn substitute_preserves_multibyte_literal_text() {
        let mut ctx = ExecutionContext::create(ContextConfig::default());
        ctx.put("name", Value::String("caf\u{e9}".into())).unwrap();
        assert_eq!(
            ctx.substitute("caf\u{e9} ${name} \u{1f600}").unwrap(),
            "caf\u{e9} \"caf\u{e9}\" \u{1f600}"
        );
    }

    #[test]
    fn substitute_unresolved_variable_fails() {
        let ctx = ExecutionContext::create(ContextConfig::default());
        let err = ctx.substitute("${missing}").unwrap_err();
        assert!(matches!(err, ContextError::UnresolvedVariable(_)));
    }

    #[test]
    fn recursion_guard_rejects_reentry() {
        let mut guard = RecursionGuard::new();
        guard.enter("double").unwrap();
        let err = guard.enter("double").unwrap_err();
        assert!(matches!(err, ContextError::Recursion(_)));
        guard.exit("double");
        assert!(guard.enter("double").is_ok());
    }
}

//! Composite tool executor (§4.F): runs a step list, threading results
//! through a per-invocation [`ExecutionContext`].

use serde_json::Value as Json;

use crate::context::{ContextConfig, ExecutionContext, RecursionGuard};
use crate::error::StatusCode;
use crate::registry::ToolRegistry;
use crate::tool::Step;
use crate::value::{ToolResult, Value};

/// Run `steps` against `params` (the caller's envelope `params` object),
/// recursively invoking `registry` for each step and threading `guard` down
/// so self-recursion is caught across the whole call chain (§4.F).
pub fn run(
    registry: &mut ToolRegistry,
    steps: &[Step],
    params: &Json,
    guard: &mut RecursionGuard,
    config: ContextConfig,
) -> ToolResult {
    let mut ctx = ExecutionContext::create(config);
    if let Json::Object(fields) = params {
        for (key, value) in fields {
            if let Err(e) = ctx.put(key.clone(), value_from_json(value)) {
                return ToolResult::error(StatusCode::ExecutionError, e.to_string());
            }
        }
    }

    let mut last = ToolResult::success(Json::Null);
    for step in steps {
        let call_params_text = match ctx.substitute(&step.params_template) {
            Ok(text) => text,
            Err(e) => return ToolResult::error(StatusCode::ExecutionError, e.to_string()),
        };
        let call_params: Json = match serde_json::from_str(&call_params_text) {
            Ok(v) => v,
            Err(e) => {
                return ToolResult::error(
                    StatusCode::ExecutionError,
                    format!("step params_template did not substitute to valid JSON: {e}"),
                )
            }
        };
        let envelope = serde_json::json!({"tool": step.tool_name, "params": call_params});
        let result = registry.dispatch(&envelope, guard);
        if !result.status.is_success() {
            return result;
        }
        if let Some(store_name) = &step.result_store {
            if let Err(e) = ctx.store_tool_result(store_name.clone(), result.clone()) {
                return ToolResult::error(StatusCode::ExecutionError, e.to_string());
            }
        }
        last = result;
    }
    last
}

fn value_from_json(json: &Json) -> Value {
    match json {
        Json::String(s) => Value::String(s.clone()),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        Json::Bool(b) => Value::Bool(*b),
        other => Value::Json(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::registry::RegistryConfig;
    use crate::tool::ToolKind;
    use serde_json::json;

    fn echo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new(Box::new(MemoryKvStore::new()), RegistryConfig::default());
        registry.init(16).unwrap();
        registry
            .register(
                "echo",
                Box::new(|req: &Json| ToolResult::success(json!({"v": req.get("v").cloned().unwrap_or(Json::Null)}))),
                None,
            )
            .unwrap();
        registry
    }

    #[test]
    fn double_composite_scenario() {
        let mut registry = echo_registry();
        let steps = vec![
            Step {
                tool_name: "echo".into(),
                params_template: "{\"v\":${x}}".into(),
                result_store: Some("a".into()),
            },
            Step {
                tool_name: "echo".into(),
                params_template: "{\"v\":${a.v}}".into(),
                result_store: None,
            },
        ];
        let mut guard = RecursionGuard::new();
        let result = run(&mut registry, &steps, &json!({"x": 7}), &mut guard, ContextConfig::default());
        assert_eq!(result.result_json, json!({"v": 7}));
        assert_eq!(ToolKind::Composite.as_str(), "composite");
    }

    #[test]
    fn missing_sub_tool_surfaces_not_found() {
        let mut registry = echo_registry();
        let steps = vec![Step {
            tool_name: "nope".into(),
            params_template: "{}".into(),
            result_store: None,
        }];
        let mut guard = RecursionGuard::new();
        let result = run(&mut registry, &steps, &json!({}), &mut guard, ContextConfig::default());
        assert_eq!(result.status, StatusCode::NotFound);
    }

    #[test]
    fn fail_fast_stops_after_first_error() {
        let mut registry = echo_registry();
        let steps = vec![
            Step {
                tool_name: "nope".into(),
                params_template: "{}".into(),
                result_store: None,
            },
            Step {
                tool_name: "echo".into(),
                params_template: "{}".into(),
                result_store: None,
            },
        ];
        let mut guard = RecursionGuard::new();
        let result = run(&mut registry, &steps, &json!({}), &mut guard, ContextConfig::default());
        assert_eq!(result.status, StatusCode::NotFound);
    }
}

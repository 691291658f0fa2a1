//! Tool registry (§4.E): fixed-capacity slot storage, dispatch by kind,
//! and dynamic-tool persistence.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::bytecode::{self, BytecodeLimits, BytecodeProgram, HostFunctions};
use crate::context::{ContextConfig, RecursionGuard};
use crate::error::{StatusCode, ToolError};
use crate::json;
use crate::kv::KvStore;
use crate::tool::{NativeHandler, ScriptBody, Step, ToolDefinition, ToolImpl, ToolKind};
use crate::value::{BytecodeValue, ToolResult};

/// The name under which the registry registers its own definition-intake
/// tool (§4.E "register `system.defineTool`").
pub const DEFINE_TOOL_NAME: &str = "system.defineTool";

/// Construction-time configuration for a [`ToolRegistry`] (§3).
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Context capacity handed to every composite/bytecode invocation.
    pub context: ContextConfig,
    /// Resource limits handed to every bytecode invocation.
    pub bytecode: BytecodeLimits,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            context: ContextConfig::default(),
            bytecode: BytecodeLimits::default(),
        }
    }
}

/// One slot in the registry's fixed-capacity vector (§4.E "vector of slot
/// entries `{active, definition}`").
struct Slot {
    active: bool,
    definition: ToolDefinition,
}

/// The tool/driver registry: register/find/invoke tools, persist and
/// reload dynamic definitions (§4.E).
pub struct ToolRegistry {
    slots: Vec<Slot>,
    by_name: HashMap<String, usize>,
    capacity: usize,
    kv: Box<dyn KvStore>,
    config: RegistryConfig,
}

impl ToolRegistry {
    /// Construct an empty, zero-capacity registry backed by `kv`. Call
    /// [`ToolRegistry::init`] before use.
    pub fn new(kv: Box<dyn KvStore>, config: RegistryConfig) -> Self {
        Self {
            slots: Vec::new(),
            by_name: HashMap::new(),
            capacity: 0,
            kv,
            config,
        }
    }

    /// Reserve `max_tools` slots, register `system.defineTool`, and load
    /// every persisted dynamic tool (§4.E). Failures to load an individual
    /// tool are logged and do not abort the batch (§7 "locally recovered").
    pub fn init(&mut self, max_tools: usize) -> Result<(), ToolError> {
        self.capacity = max_tools;
        self.slots.reserve(max_tools);
        self.insert(ToolDefinition {
            name: DEFINE_TOOL_NAME.to_string(),
            description: Some("Define a new dynamic tool".to_string()),
            schema: None,
            implementation: ToolImpl::Native(Box::new(|_req| {
                // Real dispatch for this name is intercepted in
                // `ToolRegistry::dispatch` before the slot lookup runs;
                // this handler only exists so `find`/`list` see an entry.
                ToolResult::error(StatusCode::NotImplemented, "dispatched specially, not via slot")
            })),
            is_dynamic: false,
            persistent: false,
            creation_time: 0,
        })?;
        self.load_all_dynamic();
        Ok(())
    }

    fn insert(&mut self, definition: ToolDefinition) -> Result<(), ToolError> {
        if self.by_name.contains_key(&definition.name) {
            return Err(ToolError::AlreadyExists(definition.name.clone()));
        }
        let free_slot = self.slots.iter().position(|s| !s.active);
        let index = match free_slot {
            Some(i) => {
                self.slots[i] = Slot {
                    active: true,
                    definition,
                };
                i
            }
            None => {
                if self.slots.len() >= self.capacity {
                    return Err(ToolError::Full(self.capacity));
                }
                self.slots.push(Slot {
                    active: true,
                    definition,
                });
                self.slots.len() - 1
            }
        };
        self.by_name.insert(self.slots[index].definition.name.clone(), index);
        Ok(())
    }

    /// Register a native tool. Fails `AlreadyExists` on name collision,
    /// `Full` if no slot remains (§4.E).
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: NativeHandler,
        schema: Option<String>,
    ) -> Result<(), ToolError> {
        self.insert(ToolDefinition {
            name: name.into(),
            description: None,
            schema,
            implementation: ToolImpl::Native(handler),
            is_dynamic: false,
            persistent: false,
            creation_time: 0,
        })
    }

    /// Parse and register the `system.defineTool` envelope's `params`
    /// object (§4.E). `creation_time` is supplied by the caller since the
    /// core has no clock of its own.
    pub fn register_dynamic(&mut self, params: &Json, creation_time: i64) -> Result<(), ToolError> {
        let name = json::get_string(params, "name")
            .ok_or_else(|| ToolError::InvalidParams("missing \"name\"".to_string()))?;
        let description = json::get_string(params, "description");
        let schema = json::get_string(params, "schema");
        let persistent = json::get_bool(params, "persistent", false);
        let kind_name = json::get_string(params, "implementationType").unwrap_or_else(|| "composite".to_string());
        let kind = ToolKind::from_str(&kind_name)
            .ok_or_else(|| ToolError::InvalidParams(format!("unknown implementationType \"{kind_name}\"")))?;
        let implementation_json = params
            .get("implementation")
            .ok_or_else(|| ToolError::InvalidParams("missing \"implementation\"".to_string()))?;

        let implementation = match kind {
            ToolKind::Native => {
                return Err(ToolError::InvalidParams(
                    "native tools cannot be defined dynamically".to_string(),
                ))
            }
            ToolKind::Composite => ToolImpl::Composite(parse_steps(implementation_json)?),
            ToolKind::Script => {
                let body: ScriptBody = serde_json::from_value(implementation_json.clone())
                    .map_err(|e| ToolError::InvalidParams(format!("malformed script body: {e}")))?;
                ToolImpl::Script(body)
            }
            ToolKind::Bytecode => {
                let program = bytecode::compile_json(implementation_json)?;
                ToolImpl::Bytecode(program)
            }
        };

        self.insert(ToolDefinition {
            name: name.clone(),
            description,
            schema,
            implementation,
            is_dynamic: true,
            persistent,
            creation_time,
        })?;

        if persistent {
            self.save_dynamic(&name)?;
        }
        tracing::info!(tool = %name, %persistent, "registered dynamic tool");
        Ok(())
    }

    /// Destroy a tool, freeing its slot for reuse and deleting any
    /// persisted copy (§3 "Lifecycles": a tool is destroyed on explicit
    /// unregister). Absent names are not an error.
    pub fn unregister(&mut self, name: &str) -> Result<(), ToolError> {
        if let Some(index) = self.by_name.remove(name) {
            self.slots[index].active = false;
        }
        self.kv.delete(&format!("tool.{name}"))?;
        Ok(())
    }

    /// The slot index for `name`, if registered.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// The definition for `name`, if registered.
    pub fn get_definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.find(name).map(|i| &self.slots[i].definition)
    }

    /// `{name, description?, hasSchema, isDynamic, type}` for every tool,
    /// optionally filtered to names starting with `prefix`.
    pub fn list(&self, prefix: Option<&str>) -> Json {
        let items: Vec<Json> = self
            .slots
            .iter()
            .filter(|s| s.active)
            .filter(|s| prefix.is_none_or(|p| s.definition.name.starts_with(p)))
            .map(|s| s.definition.summary_json())
            .collect();
        Json::Array(items)
    }

    /// Dispatch a request envelope `{"tool": ..., "params": ...}` and
    /// return a wire-ready [`ToolResult`] (§4.E, §6). Never panics on
    /// malformed input; malformed envelopes surface as `InvalidParams`.
    pub fn execute(&mut self, envelope: &Json) -> ToolResult {
        let mut guard = RecursionGuard::new();
        self.dispatch(envelope, &mut guard)
    }

    pub(crate) fn dispatch(&mut self, envelope: &Json, guard: &mut RecursionGuard) -> ToolResult {
        let Some(name) = json::get_string(envelope, "tool") else {
            return ToolResult::error(StatusCode::InvalidParams, "missing \"tool\" field");
        };
        let params = envelope.get("params").cloned().unwrap_or(Json::Object(Default::default()));

        if name == DEFINE_TOOL_NAME {
            return match self.register_dynamic(&params, 0) {
                Ok(()) => ToolResult::success(serde_json::json!({"registered": true})),
                Err(e) => ToolResult::error(status_for_tool_error(&e), e.to_string()),
            };
        }

        let Some(index) = self.find(&name) else {
            return ToolResult::error(StatusCode::NotFound, format!("tool not found: {name}"));
        };

        if let Some(schema) = self.slots[index].definition.schema.clone() {
            if !json::validate_schema(&params, &schema) {
                return ToolResult::error(StatusCode::InvalidParams, "schema validation failed");
            }
        }

        match &self.slots[index].definition.implementation {
            ToolImpl::Native(handler) => handler(&params),
            ToolImpl::Script(_) => ToolResult::error(StatusCode::NotImplemented, "script tools are not executable yet"),
            ToolImpl::Composite(_) => {
                if guard.enter(&name).is_err() {
                    return ToolResult::error(StatusCode::ExecutionError, "tool recursion");
                }
                let steps = match &self.slots[index].definition.implementation {
                    ToolImpl::Composite(steps) => steps.clone(),
                    _ => unreachable!(),
                };
                let context_config = self.config.context;
                let result = crate::composite::run(self, &steps, &params, guard, context_config);
                guard.exit(&name);
                result
            }
            ToolImpl::Bytecode(_) => {
                let program = match &self.slots[index].definition.implementation {
                    ToolImpl::Bytecode(p) => p.clone(),
                    _ => unreachable!(),
                };
                self.run_bytecode(&program, &params, guard)
            }
        }
    }

    fn run_bytecode(&mut self, program: &BytecodeProgram, params: &Json, guard: &mut RecursionGuard) -> ToolResult {
        let mut vars: Vec<BytecodeValue> = program
            .variable_names
            .iter()
            .map(|name| params.get(name).map(BytecodeValue::from_json).unwrap_or(BytecodeValue::Null))
            .collect();
        let limits = self.config.bytecode;
        let mut host = RegistryHost { registry: self, guard };
        match bytecode::run(program, &mut vars, &mut host, limits) {
            Ok(value) => ToolResult::success(value.to_json()),
            Err(crate::error::BytecodeError::StepBudgetExceeded(n)) => {
                tracing::warn!(budget = n, "bytecode execution exceeded step budget");
                ToolResult::error(StatusCode::Timeout, format!("exceeded instruction budget of {n}"))
            }
            Err(e) => ToolResult::error(StatusCode::ExecutionError, e.to_string()),
        }
    }

    /// Write `name`'s current definition to the KV store under
    /// `tool.<name>` (§4.E, §6).
    pub fn save_dynamic(&self, name: &str) -> Result<(), ToolError> {
        let definition = self.get_definition(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let persisted = PersistedTool::from_definition(definition)?;
        let bytes = serde_json::to_vec(&persisted).map_err(|e| ToolError::ExecutionError(e.to_string()))?;
        self.kv.write(&format!("tool.{name}"), &bytes)?;
        Ok(())
    }

    /// Load one persisted dynamic tool by name, overwriting any existing
    /// in-memory slot with the same name (used by `load_all_dynamic` and
    /// available standalone for restoring a single tool).
    pub fn load_dynamic(&mut self, name: &str) -> Result<(), ToolError> {
        let bytes = self
            .kv
            .read(&format!("tool.{name}"))?
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let persisted: PersistedTool =
            serde_json::from_slice(&bytes).map_err(|e| ToolError::ExecutionError(format!("corrupt persisted tool: {e}")))?;
        let definition = persisted.into_definition()?;
        if let Some(index) = self.find(&definition.name) {
            self.by_name.remove(&self.slots[index].definition.name);
            self.slots[index] = Slot {
                active: true,
                definition,
            };
            self.by_name.insert(name.to_string(), index);
            Ok(())
        } else {
            self.insert(definition)
        }
    }

    /// Load every persisted dynamic tool, in KV-enumeration order.
    /// Failures for individual tools are logged and skipped (§4.E
    /// "Ordering").
    pub fn load_all_dynamic(&mut self) {
        let keys = match self.kv.list_keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(error = %e, "failed to enumerate persisted tools");
                return;
            }
        };
        for key in keys {
            let Some(name) = crate::kv::is_tool_key(&key) else {
                continue;
            };
            if let Err(e) = self.load_dynamic(name) {
                tracing::warn!(tool = name, error = %e, "failed to load persisted tool, skipping");
            }
        }
    }
}

fn status_for_tool_error(e: &ToolError) -> StatusCode {
    match e {
        ToolError::AlreadyExists(_) | ToolError::Full(_) => StatusCode::Error,
        ToolError::NotFound(_) => StatusCode::NotFound,
        ToolError::InvalidParams(_) => StatusCode::InvalidParams,
        _ => StatusCode::ExecutionError,
    }
}

fn parse_steps(json: &Json) -> Result<Vec<Step>, ToolError> {
    let array = json
        .as_array()
        .ok_or_else(|| ToolError::InvalidParams("composite implementation must be an array".to_string()))?;
    array
        .iter()
        .map(|entry| {
            let tool_name = json::get_string(entry, "tool")
                .ok_or_else(|| ToolError::InvalidParams("composite step missing \"tool\"".to_string()))?;
            let params_template = json::get_string(entry, "params")
                .ok_or_else(|| ToolError::InvalidParams("composite step missing \"params\"".to_string()))?;
            let result_store = json::get_string(entry, "store");
            Ok(Step {
                tool_name,
                params_template,
                result_store,
            })
        })
        .collect()
}

/// Bridges bytecode `CALL` back into the registry's own dispatch path
/// (§4.D "invokes a host function ... against the registered tool
/// namespace"), threading the recursion guard through so a bytecode tool
/// that calls a composite tool still participates in cycle detection.
struct RegistryHost<'a> {
    registry: &'a mut ToolRegistry,
    guard: &'a mut RecursionGuard,
}

impl HostFunctions for RegistryHost<'_> {
    fn call(&mut self, name: &str, args: Vec<BytecodeValue>) -> Result<BytecodeValue, crate::error::BytecodeError> {
        let params = match args.len() {
            0 => Json::Object(Default::default()),
            1 => args[0].to_json(),
            _ => Json::Array(args.iter().map(BytecodeValue::to_json).collect()),
        };
        let envelope = serde_json::json!({"tool": name, "params": params});
        let result = self.registry.dispatch(&envelope, self.guard);
        if result.status.is_success() {
            Ok(BytecodeValue::from_json(&result.result_json))
        } else {
            Err(crate::error::BytecodeError::CallFailed(format!(
                "{name}: {}",
                result.result_json
            )))
        }
    }
}

/// The JSON-serializable mirror of a [`ToolDefinition`] written to the KV
/// store (§4.E "compact JSON mirror ... bytecode programs are
/// base64-encoded binary").
#[derive(Serialize, Deserialize)]
struct PersistedTool {
    name: String,
    description: Option<String>,
    schema: Option<String>,
    persistent: bool,
    creation_time: i64,
    payload: PersistedPayload,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum PersistedPayload {
    Composite { steps: Vec<Step> },
    Script { body: ScriptBody },
    Bytecode { image_base64: String },
}

impl PersistedTool {
    fn from_definition(definition: &ToolDefinition) -> Result<Self, ToolError> {
        let payload = match &definition.implementation {
            ToolImpl::Composite(steps) => PersistedPayload::Composite { steps: steps.clone() },
            ToolImpl::Script(body) => PersistedPayload::Script { body: body.clone() },
            ToolImpl::Bytecode(program) => PersistedPayload::Bytecode {
                image_base64: BASE64.encode(bytecode::serialize(program)),
            },
            ToolImpl::Native(_) => {
                return Err(ToolError::InvalidParams(
                    "native tools are not persistable".to_string(),
                ))
            }
        };
        Ok(Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            schema: definition.schema.clone(),
            persistent: definition.persistent,
            creation_time: definition.creation_time,
            payload,
        })
    }

    fn into_definition(self) -> Result<ToolDefinition, ToolError> {
        let implementation = match self.payload {
            PersistedPayload::Composite { steps } => ToolImpl::Composite(steps),
            PersistedPayload::Script { body } => ToolImpl::Script(body),
            PersistedPayload::Bytecode { image_base64 } => {
                let bytes = BASE64
                    .decode(image_base64)
                    .map_err(|e| ToolError::ExecutionError(format!("corrupt bytecode image: {e}")))?;
                ToolImpl::Bytecode(bytecode::deserialize(&bytes)?)
            }
        };
        Ok(ToolDefinition {
            name: self.name,
            description: self.description,
            schema: self.schema,
            implementation,
            is_dynamic: true,
            persistent: self.persistent,
            creation_time: self.creation_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use serde_json::json;
    use std::sync::Arc;

    fn new_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new(Box::new(MemoryKvStore::new()), RegistryConfig::default());
        registry.init(16).unwrap();
        registry
    }

    #[test]
    fn register_and_invoke_native_echo() {
        let mut registry = new_registry();
        registry
            .register(
                "echo",
                Box::new(|req: &Json| ToolResult::success(json!({"v": req.get("v").cloned().unwrap_or(Json::Null)}))),
                None,
            )
            .unwrap();
        let result = registry.execute(&json!({"tool": "echo", "params": {"v": 42}}));
        assert_eq!(result.result_json, json!({"v": 42}));
    }

    #[test]
    fn duplicate_registration_fails_and_does_not_mutate() {
        let mut registry = new_registry();
        registry
            .register("echo", Box::new(|_: &Json| ToolResult::success(Json::Null)), None)
            .unwrap();
        let err = registry
            .register("echo", Box::new(|_: &Json| ToolResult::success(Json::Null)), None)
            .unwrap_err();
        assert!(matches!(err, ToolError::AlreadyExists(_)));
        assert_eq!(registry.list(None).as_array().unwrap().len(), 2); // defineTool + echo
    }

    #[test]
    fn unknown_tool_is_not_found() {
        let mut registry = new_registry();
        let result = registry.execute(&json!({"tool": "nope", "params": {}}));
        assert_eq!(result.status, StatusCode::NotFound);
    }

    #[test]
    fn malformed_envelope_is_invalid_params() {
        let mut registry = new_registry();
        let result = registry.execute(&json!({"params": {}}));
        assert_eq!(result.status, StatusCode::InvalidParams);
    }

    #[test]
    fn define_tool_then_invoke_composite() {
        let mut registry = new_registry();
        registry
            .register(
                "echo",
                Box::new(|req: &Json| ToolResult::success(json!({"v": req.get("v").cloned().unwrap_or(Json::Null)}))),
                None,
            )
            .unwrap();
        let define = json!({
            "tool": "system.defineTool",
            "params": {
                "name": "double",
                "implementationType": "composite",
                "implementation": [
                    {"tool": "echo", "params": "{\"v\":${x}}", "store": "a"},
                    {"tool": "echo", "params": "{\"v\":${a.v}}"}
                ]
            }
        });
        let result = registry.execute(&define);
        assert!(result.status.is_success());
        let invoke = registry.execute(&json!({"tool": "double", "params": {"x": 7}}));
        assert_eq!(invoke.result_json, json!({"v": 7}));
    }

    #[test]
    fn persistence_survives_simulated_restart() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut registry = ToolRegistry::new(Box::new(ArcKv(kv.clone())), RegistryConfig::default());
        registry.init(16).unwrap();
        registry
            .register(
                "echo",
                Box::new(|_: &Json| ToolResult::success(json!({"pong": true}))),
                None,
            )
            .unwrap();
        let define = json!({
            "tool": "system.defineTool",
            "params": {
                "name": "ping",
                "implementationType": "composite",
                "persistent": true,
                "implementation": [{"tool": "echo", "params": "{}"}]
            }
        });
        assert!(registry.execute(&define).status.is_success());

        // Simulate restart: a brand-new registry sharing the same backing store.
        let mut restarted = ToolRegistry::new(Box::new(ArcKv(kv)), RegistryConfig::default());
        restarted.init(16).unwrap();
        assert!(restarted.get_definition("ping").is_some());
        let result = restarted.execute(&json!({"tool": "ping", "params": {}}));
        assert_eq!(result.result_json, json!({"pong": true}));
    }

    #[test]
    fn bytecode_tool_runs_end_to_end() {
        let mut registry = new_registry();
        let define = json!({
            "tool": "system.defineTool",
            "params": {
                "name": "add",
                "implementationType": "bytecode",
                "implementation": {
                    "instructions": [
                        {"op": "PUSH_NUM", "operand": 3.0},
                        {"op": "PUSH_NUM", "operand": 4.0},
                        {"op": "ADD"},
                        {"op": "HALT"}
                    ]
                }
            }
        });
        assert!(registry.execute(&define).status.is_success());
        let result = registry.execute(&json!({"tool": "add", "params": {}}));
        assert_eq!(result.result_json, json!(7.0));
    }

    #[test]
    fn unregister_frees_the_slot_for_reuse() {
        let mut registry = new_registry();
        registry
            .register("echo", Box::new(|_: &Json| ToolResult::success(Json::Null)), None)
            .unwrap();
        registry.unregister("echo").unwrap();
        assert!(registry.get_definition("echo").is_none());
        registry
            .register("echo", Box::new(|_: &Json| ToolResult::success(Json::Null)), None)
            .unwrap();
    }

    #[test]
    fn list_filters_by_prefix() {
        let mut registry = new_registry();
        registry
            .register("device.status", Box::new(|_: &Json| ToolResult::success(Json::Null)), None)
            .unwrap();
        let filtered = registry.list(Some("device."));
        assert_eq!(filtered.as_array().unwrap().len(), 1);
    }

    /// A thin `Arc`-sharing adapter so two registries in the same test can
    /// observe the same backing store, simulating a restart.
    struct ArcKv(Arc<MemoryKvStore>);
    impl KvStore for ArcKv {
        fn write(&self, key: &str, value: &[u8]) -> Result<(), crate::error::KvError> {
            self.0.write(key, value)
        }
        fn read(&self, key: &str) -> Result<Option<Vec<u8>>, crate::error::KvError> {
            self.0.read(key)
        }
        fn list_keys(&self) -> Result<Vec<String>, crate::error::KvError> {
            self.0.list_keys()
        }
        fn delete(&self, key: &str) -> Result<(), crate::error::KvError> {
            self.0.delete(key)
        }
    }
}

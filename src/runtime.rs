//! The runtime facade (§9 Design Notes: "re-architect the implicit global
//! state as a single value"): owns the tool registry, auth manager, driver
//! manager/bridge, and device-info snapshot, and exposes one
//! [`Runtime::dispatch`] entry point implementing the full request flow
//! (auth gate -> routing -> tool/driver/system dispatch -> wire result).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value as Json;

use crate::auth::{AnonymousPolicy, AuthManager, AuthMethod, Credential};
use crate::device_info::DeviceInfo;
use crate::driver::{DriverBridge, DriverKind, DriverManager, NativeDriver};
use crate::error::StatusCode;
use crate::json;
use crate::kv::KvStore;
use crate::registry::{RegistryConfig, ToolRegistry};
use crate::value::ToolResult;

/// Construction-time configuration for a [`Runtime`].
pub struct RuntimeConfig {
    pub max_tools: usize,
    pub registry: RegistryConfig,
    pub anonymous_policy: AnonymousPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_tools: 64,
            registry: RegistryConfig::default(),
            anonymous_policy: AnonymousPolicy::default(),
        }
    }
}

/// The whole running server: tool registry, auth gate, driver subsystem,
/// and device-info snapshot behind one dispatch surface (§2, §9).
pub struct Runtime {
    registry: ToolRegistry,
    auth: AuthManager,
    drivers: DriverManager,
    bridge: DriverBridge,
    device_info: DeviceInfo,
}

impl Runtime {
    /// Boot a runtime: initializes the tool registry (loading any persisted
    /// dynamic tools) and the auth manager (loading any persisted auth
    /// config from the same store).
    pub fn boot(kv: Box<dyn KvStore>, device_info: DeviceInfo, config: RuntimeConfig) -> Result<Self, crate::error::ToolError> {
        let mut registry = ToolRegistry::new(kv, config.registry);
        registry.init(config.max_tools)?;
        let mut auth = AuthManager::init(true);
        auth.set_anonymous_policy(config.anonymous_policy);
        Ok(Self {
            registry,
            auth,
            drivers: DriverManager::new(),
            bridge: DriverBridge::new(),
            device_info,
        })
    }

    /// Load a previously persisted auth config from `kv` (typically the
    /// same store backing the tool registry).
    pub fn load_auth(&mut self, kv: &dyn KvStore) -> Result<(), crate::error::KvError> {
        self.auth.load(kv)
    }

    /// Register a native driver at boot time. Trait objects ([`NativeDriver`])
    /// can only be supplied from Rust, so this is a host-side API call
    /// rather than a wire tool — unlike `system.defineTool`, there is no
    /// JSON shape that could carry a `Box<dyn LedDriver>` (§9).
    #[allow(clippy::too_many_arguments)]
    pub fn register_native_driver(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        kind: DriverKind,
        device_type: impl Into<String>,
        native: NativeDriver,
        config_schema: Option<String>,
    ) -> Result<(), crate::error::DriverError> {
        self.bridge.register(
            &mut self.drivers,
            id,
            name,
            version,
            kind,
            device_type,
            native,
            config_schema,
        )
    }

    /// Handle one request envelope `{"tool": ..., "params": ..., "auth"?:
    /// {"method": ..., "token": <base64>}}` and return the wire-ready
    /// result (§2, §6).
    pub fn dispatch(&mut self, envelope: &Json) -> ToolResult {
        let credential = parse_credential(envelope);
        if !self.auth.validate(&credential) {
            return ToolResult::error(StatusCode::PermissionDenied, "authentication required");
        }

        let Some(name) = json::get_string(envelope, "tool") else {
            return ToolResult::error(StatusCode::InvalidParams, "missing \"tool\" field");
        };
        let params = envelope.get("params").cloned().unwrap_or(Json::Object(Default::default()));

        match name.as_str() {
            "system.setAuth" => self.handle_set_auth(&params),
            "system.getAuthStatus" => ToolResult::success(self.auth.status_json()),
            "system.clearAuth" => {
                self.auth.clear();
                ToolResult::success(serde_json::json!({"cleared": true}))
            }
            "system.unregisterNativeDriver" => self.handle_unregister_driver(&params),
            "system.listNativeDrivers" => ToolResult::success(self.bridge.list()),
            "system.executeNativeDriverFunction" => self.handle_execute_driver_function(&params),
            "device.getInfo" => ToolResult::success(self.device_info.respond(&params)),
            _ => self.registry.execute(envelope),
        }
    }

    /// The wire-level entry point (§6): parse a request envelope, dispatch
    /// it, and render the result as the wire JSON string — the tool's own
    /// success body, or `{"error": true, "code", "message"}` on failure.
    pub fn dispatch_str(&mut self, envelope_json: &str) -> String {
        let envelope: Json = match serde_json::from_str(envelope_json) {
            Ok(v) => v,
            Err(e) => {
                return ToolResult::error(StatusCode::InvalidParams, format!("malformed request JSON: {e}"))
                    .result_json
                    .to_string()
            }
        };
        self.dispatch(&envelope).result_json.to_string()
    }

    fn handle_set_auth(&mut self, params: &Json) -> ToolResult {
        let Some(method_str) = json::get_string(params, "method") else {
            return ToolResult::error(StatusCode::InvalidParams, "missing \"method\"");
        };
        let Ok(method) = serde_json::from_value::<AuthMethod>(Json::String(method_str.clone())) else {
            return ToolResult::error(StatusCode::InvalidParams, format!("unknown auth method \"{method_str}\""));
        };
        let token = match params.get("token").and_then(Json::as_str) {
            Some(encoded) => match BASE64.decode(encoded) {
                Ok(bytes) => Some(bytes),
                Err(_) => return ToolResult::error(StatusCode::InvalidParams, "token is not valid base64"),
            },
            None => None,
        };
        let persistent = json::get_bool(params, "persistent", false);
        match self.auth.set(method, token, persistent) {
            Ok(()) => ToolResult::success(serde_json::json!({"set": true})),
            Err(e) => ToolResult::error(StatusCode::InvalidParams, e.to_string()),
        }
    }

    fn handle_unregister_driver(&mut self, params: &Json) -> ToolResult {
        let Some(id) = json::get_string(params, "id") else {
            return ToolResult::error(StatusCode::InvalidParams, "missing \"id\"");
        };
        self.bridge.unregister(&mut self.drivers, &id);
        ToolResult::success(serde_json::json!({"unregistered": true}))
    }

    fn handle_execute_driver_function(&mut self, params: &Json) -> ToolResult {
        // §8 scenario 6 writes the verb under "function"; "verb" is accepted
        // too since that's the field name used elsewhere in this module.
        let verb = json::get_string(params, "verb").or_else(|| json::get_string(params, "function"));
        let (Some(id), Some(verb)) = (json::get_string(params, "id"), verb) else {
            return ToolResult::error(StatusCode::InvalidParams, "missing \"id\" or \"verb\"/\"function\"");
        };
        let args = params.get("args").cloned().unwrap_or(Json::Null);
        match self.bridge.execute_function(&mut self.drivers, &id, &verb, &args) {
            Ok(json) => ToolResult::success(json),
            Err(e) => ToolResult::error(status_for_driver_error(&e), e.to_string()),
        }
    }
}

fn status_for_driver_error(e: &crate::error::DriverError) -> StatusCode {
    use crate::error::DriverError;
    match e {
        DriverError::NotFound(_) | DriverError::UnmappedVerb { .. } => StatusCode::NotFound,
        DriverError::NotInitialized(_) => StatusCode::ExecutionError,
        DriverError::AlreadyExists(_) => StatusCode::Error,
        DriverError::CallFailed(_) | DriverError::BadArguments(_) => StatusCode::ExecutionError,
    }
}

fn parse_credential(envelope: &Json) -> Credential {
    let Some(auth) = envelope.get("auth") else {
        return Credential::none();
    };
    let method = json::get_string(auth, "method")
        .and_then(|m| serde_json::from_value::<AuthMethod>(Json::String(m)).ok())
        .unwrap_or(AuthMethod::None);
    let token = auth
        .get("token")
        .and_then(Json::as_str)
        .and_then(|encoded| BASE64.decode(encoded).ok());
    Credential { method, token }
}

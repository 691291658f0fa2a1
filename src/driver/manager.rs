//! Driver manager (§4.G): lifecycle and standard verb interface for
//! registered native hardware drivers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::DriverError;

/// The driver family, used by `get_by_type` and device-type-aware
/// adaptation in the bridge (§3 "DriverInfo").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DriverKind {
    /// Reads a physical quantity (temperature, light, ...).
    Sensor,
    /// Drives a physical output (LED, motor, relay, ...).
    Actuator,
    /// A communication interface (I2C, SPI, UART, ...).
    Interface,
    /// Block or byte storage.
    Storage,
    /// A network transport.
    Network,
    /// Anything not covered by the above.
    Custom,
}

/// A registered driver's lifecycle state (§4.H "State machine per
/// driver").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Registered but never initialized.
    Registered,
    /// `initialize` succeeded; not currently mid-operation.
    Initialized,
    /// Servicing a call (reserved for hosts that want finer-grained
    /// status; the core treats `Running` and `Initialized` identically
    /// for read/write/control eligibility).
    Running,
    /// `deinitialize` was called; reads/writes are rejected again.
    Deinitialized,
}

/// The standard lifecycle/verb interface every driver exposes (§3
/// "DriverInfo.iface").
///
/// Closures are plain `FnMut`, not `Send` — the runtime is single-threaded
/// (no concurrent multi-client execution), so there is nothing to gain from
/// forcing driver state behind a thread-safe wrapper.
pub struct DriverInterface {
    /// Parse `config_json` and bring the device up.
    pub init: Box<dyn FnMut(&Json) -> Result<(), DriverError>>,
    /// Tear the device down.
    pub deinit: Box<dyn FnMut() -> Result<(), DriverError>>,
    /// Read from the device, returning a JSON result body.
    pub read: Box<dyn FnMut(&Json) -> Result<Json, DriverError>>,
    /// Write to the device.
    pub write: Box<dyn FnMut(&Json) -> Result<Json, DriverError>>,
    /// Issue a control command.
    pub control: Box<dyn FnMut(&Json) -> Result<Json, DriverError>>,
    /// Report current status as JSON.
    pub get_status: Box<dyn FnMut() -> Result<Json, DriverError>>,
}

/// A registered driver (§3 "DriverInfo").
pub struct DriverInfo {
    /// Unique driver id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Driver version string.
    pub version: String,
    /// The driver family.
    pub kind: DriverKind,
    /// The standard verb interface.
    pub iface: DriverInterface,
    /// Current lifecycle state.
    pub state: DriverState,
    /// Opaque config-schema hint, informational only.
    pub config_schema: Option<String>,
}

impl DriverInfo {
    fn initialized(&self) -> bool {
        matches!(self.state, DriverState::Initialized | DriverState::Running)
    }
}

/// Maintains the `driver_id -> DriverInfo` map and its lifecycle
/// operations (§4.G).
#[derive(Default)]
pub struct DriverManager {
    drivers: HashMap<String, DriverInfo>,
}

impl DriverManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `info`. Fails `AlreadyExists` for a duplicate id.
    pub fn register(&mut self, info: DriverInfo) -> Result<(), DriverError> {
        if self.drivers.contains_key(&info.id) {
            return Err(DriverError::AlreadyExists(info.id));
        }
        self.drivers.insert(info.id.clone(), info);
        Ok(())
    }

    /// Remove a driver. Absent ids are not an error.
    pub fn unregister(&mut self, id: &str) {
        self.drivers.remove(id);
    }

    /// Look up a driver by id.
    pub fn find(&self, id: &str) -> Option<&DriverInfo> {
        self.drivers.get(id)
    }

    /// All drivers of a given family.
    pub fn get_by_type(&self, kind: DriverKind) -> Vec<&DriverInfo> {
        self.drivers.values().filter(|d| d.kind == kind).collect()
    }

    /// Parse `config_json` and bring the driver up, setting `initialized`
    /// on success (§4.G).
    pub fn initialize(&mut self, id: &str, config_json: &Json) -> Result<(), DriverError> {
        let driver = self.drivers.get_mut(id).ok_or_else(|| DriverError::NotFound(id.to_string()))?;
        (driver.iface.init)(config_json)?;
        driver.state = DriverState::Initialized;
        Ok(())
    }

    /// Tear the driver down, setting state back to `Deinitialized`.
    pub fn deinitialize(&mut self, id: &str) -> Result<(), DriverError> {
        let driver = self.drivers.get_mut(id).ok_or_else(|| DriverError::NotFound(id.to_string()))?;
        (driver.iface.deinit)()?;
        driver.state = DriverState::Deinitialized;
        Ok(())
    }

    /// Read from `id`. Fails `NotInitialized` unless the driver is
    /// initialized/running.
    pub fn read(&mut self, id: &str, params: &Json) -> Result<Json, DriverError> {
        let driver = self.drivers.get_mut(id).ok_or_else(|| DriverError::NotFound(id.to_string()))?;
        if !driver.initialized() {
            return Err(DriverError::NotInitialized(id.to_string()));
        }
        (driver.iface.read)(params)
    }

    /// Write to `id`. Fails `NotInitialized` unless the driver is
    /// initialized/running.
    pub fn write(&mut self, id: &str, params: &Json) -> Result<Json, DriverError> {
        let driver = self.drivers.get_mut(id).ok_or_else(|| DriverError::NotFound(id.to_string()))?;
        if !driver.initialized() {
            return Err(DriverError::NotInitialized(id.to_string()));
        }
        (driver.iface.write)(params)
    }

    /// Issue a control command to `id`. Fails `NotInitialized` unless the
    /// driver is initialized/running.
    pub fn control(&mut self, id: &str, params: &Json) -> Result<Json, DriverError> {
        let driver = self.drivers.get_mut(id).ok_or_else(|| DriverError::NotFound(id.to_string()))?;
        if !driver.initialized() {
            return Err(DriverError::NotInitialized(id.to_string()));
        }
        (driver.iface.control)(params)
    }

    /// Query status for `id`. Fails `NotInitialized` unless the driver is
    /// initialized/running.
    pub fn get_status(&mut self, id: &str) -> Result<Json, DriverError> {
        let driver = self.drivers.get_mut(id).ok_or_else(|| DriverError::NotFound(id.to_string()))?;
        if !driver.initialized() {
            return Err(DriverError::NotInitialized(id.to_string()));
        }
        (driver.iface.get_status)()
    }

    /// List every registered driver as `{id, name, kind, initialized}`
    /// summaries, used by `system.listNativeDrivers`.
    pub fn list(&self) -> Json {
        let items: Vec<Json> = self
            .drivers
            .values()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "name": d.name,
                    "version": d.version,
                    "initialized": d.initialized(),
                })
            })
            .collect();
        Json::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn noop_driver(id: &str, kind: DriverKind) -> DriverInfo {
        DriverInfo {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0".to_string(),
            kind,
            iface: DriverInterface {
                init: Box::new(|_| Ok(())),
                deinit: Box::new(|| Ok(())),
                read: Box::new(|_| Ok(Json::Null)),
                write: Box::new(|_| Ok(Json::Null)),
                control: Box::new(|_| Ok(Json::Null)),
                get_status: Box::new(|| Ok(Json::Null)),
            },
            state: DriverState::Registered,
            config_schema: None,
        }
    }

    #[test]
    fn register_duplicate_id_fails() {
        let mut manager = DriverManager::new();
        manager.register(noop_driver("led1", DriverKind::Actuator)).unwrap();
        let err = manager.register(noop_driver("led1", DriverKind::Actuator)).unwrap_err();
        assert!(matches!(err, DriverError::AlreadyExists(_)));
    }

    #[test]
    fn read_before_initialize_fails() {
        let mut manager = DriverManager::new();
        manager.register(noop_driver("temp1", DriverKind::Sensor)).unwrap();
        let err = manager.read("temp1", &Json::Null).unwrap_err();
        assert!(matches!(err, DriverError::NotInitialized(_)));
    }

    #[test]
    fn initialize_then_read_succeeds() {
        let mut manager = DriverManager::new();
        manager.register(noop_driver("temp1", DriverKind::Sensor)).unwrap();
        manager.initialize("temp1", &Json::Null).unwrap();
        assert!(manager.read("temp1", &Json::Null).is_ok());
    }

    #[test]
    fn get_by_type_filters() {
        let mut manager = DriverManager::new();
        manager.register(noop_driver("led1", DriverKind::Actuator)).unwrap();
        manager.register(noop_driver("temp1", DriverKind::Sensor)).unwrap();
        assert_eq!(manager.get_by_type(DriverKind::Sensor).len(), 1);
    }

    #[test]
    fn init_forwards_to_native_function() {
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();
        let mut driver = noop_driver("relay1", DriverKind::Actuator);
        driver.iface.init = Box::new(move |_| {
            *calls_clone.lock().unwrap() += 1;
            Ok(())
        });
        let mut manager = DriverManager::new();
        manager.register(driver).unwrap();
        manager.initialize("relay1", &Json::Null).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}

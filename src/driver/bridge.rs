//! Driver bridge (§4.H): device-type-aware adaptation between the generic
//! tool-invocation surface and native hardware drivers.
//!
//! Rather than a central switch over device type, each family gets its own
//! typed adapter behind [`NativeDriver`] (§9 "Design Notes"); device types
//! with no dedicated adapter fall back to [`GenericHooks`], a plain
//! verb-name-to-function map.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value as Json;

use crate::driver::manager::{DriverInfo, DriverInterface, DriverKind, DriverManager, DriverState};
use crate::error::DriverError;

/// Native LED control surface.
pub trait LedDriver {
    fn set_power(&mut self, on: bool) -> Result<(), DriverError>;
    fn set_brightness(&mut self, percent: u8) -> Result<(), DriverError>;
    fn set_color(&mut self, r: u8, g: u8, b: u8) -> Result<(), DriverError>;
    fn status(&self) -> LedStatus;
}

/// Current LED state, used to answer `getStatus`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedStatus {
    pub on: bool,
    pub brightness: u8,
    pub color: (u8, u8, u8),
}

/// Native temperature-sensor control surface (e.g. a DS18B20).
pub trait TemperatureDriver {
    fn read_celsius(&mut self) -> Result<f64, DriverError>;
}

/// A single named native function, used for device types without a
/// dedicated typed adapter.
pub type NativeFn = Box<dyn FnMut(&Json) -> Result<Json, DriverError>>;

/// Arbitrary verb-name-to-native-function mappings.
#[derive(Default)]
pub struct GenericHooks {
    functions: HashMap<String, NativeFn>,
}

impl GenericHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `verb` to a native function. Replaces any existing mapping.
    pub fn map(&mut self, verb: impl Into<String>, f: NativeFn) {
        self.functions.insert(verb.into(), f);
    }

    fn call(&mut self, verb: &str, args: &Json) -> Result<Json, DriverError> {
        let f = self
            .functions
            .get_mut(verb)
            .ok_or_else(|| DriverError::BadArguments(format!("no native function mapped for verb '{verb}'")))?;
        f(args)
    }
}

/// The concrete native driver behind a bridge entry (§9 "enum NativeDriver").
pub enum NativeDriver {
    Led(Box<dyn LedDriver>),
    Temp(Box<dyn TemperatureDriver>),
    Generic(GenericHooks),
}

/// The family-specific verb a mapping was inferred to represent, used for
/// introspection and `executeNativeDriverFunction` routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbType {
    Init,
    Deinit,
    Read,
    Write,
    Control,
    GetStatus,
    Custom,
}

impl VerbType {
    /// Infer the verb type from its name, per the six standard bridge verbs;
    /// anything else is `Custom`.
    pub fn infer(verb_name: &str) -> Self {
        match verb_name {
            "init" => VerbType::Init,
            "deinit" => VerbType::Deinit,
            "read" => VerbType::Read,
            "write" => VerbType::Write,
            "control" => VerbType::Control,
            "getStatus" => VerbType::GetStatus,
            _ => VerbType::Custom,
        }
    }
}

/// A verb exposed by a bridged driver (§3 "BridgeDriverEntry.mappings").
#[derive(Debug, Clone)]
pub struct VerbMapping {
    pub verb_name: String,
    pub verb_type: VerbType,
}

/// A driver exposed through the bridge (§3 "BridgeDriverEntry").
#[derive(Debug, Clone)]
pub struct BridgeDriverEntry {
    pub id: String,
    pub device_type: String,
    pub driver_kind: DriverKind,
    pub mappings: Vec<VerbMapping>,
}

/// Adapts [`NativeDriver`]s onto the [`DriverManager`]'s generic
/// `DriverInterface`, and tracks each driver's device type and verb
/// mappings for introspection (§4.H).
#[derive(Default)]
pub struct DriverBridge {
    entries: HashMap<String, BridgeDriverEntry>,
}

impl DriverBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native driver with `manager`, installing the standard
    /// bridge verbs (`init`/`deinit`/`read`/`write`/`control`/`getStatus`)
    /// as forwarders onto `native`, device-type-adapted.
    pub fn register(
        &mut self,
        manager: &mut DriverManager,
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        kind: DriverKind,
        device_type: impl Into<String>,
        native: NativeDriver,
        config_schema: Option<String>,
    ) -> Result<(), DriverError> {
        let id = id.into();
        let device_type = device_type.into();
        let shared = Rc::new(RefCell::new(native));

        let iface = build_interface(shared);

        manager.register(DriverInfo {
            id: id.clone(),
            name: name.into(),
            version: version.into(),
            kind,
            iface,
            state: DriverState::Registered,
            config_schema,
        })?;

        let mut mappings = standard_mappings();
        // LED devices additionally expose a typed `setColor` verb alongside
        // the six standard ones, taking top-level `r`/`g`/`b` args.
        if device_type == "led" {
            mappings.push(VerbMapping {
                verb_name: "setColor".to_string(),
                verb_type: VerbType::Custom,
            });
        }

        self.entries.insert(
            id.clone(),
            BridgeDriverEntry {
                id,
                device_type,
                driver_kind: kind,
                mappings,
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, manager: &mut DriverManager, id: &str) {
        manager.unregister(id);
        self.entries.remove(id);
    }

    /// Record that `verb_name` is mapped for `driver_id`, inferring its
    /// [`VerbType`] from the name. Only updates bridge bookkeeping; the
    /// actual function lives inside the driver's [`GenericHooks`] (set up
    /// at registration) or is one of the six standard verbs.
    pub fn map_function(&mut self, driver_id: &str, verb_name: &str) -> Result<(), DriverError> {
        let entry = self
            .entries
            .get_mut(driver_id)
            .ok_or_else(|| DriverError::NotFound(driver_id.to_string()))?;
        let verb_type = VerbType::infer(verb_name);
        if let Some(existing) = entry.mappings.iter_mut().find(|m| m.verb_name == verb_name) {
            existing.verb_type = verb_type;
        } else {
            entry.mappings.push(VerbMapping {
                verb_name: verb_name.to_string(),
                verb_type,
            });
        }
        Ok(())
    }

    pub fn find(&self, id: &str) -> Option<&BridgeDriverEntry> {
        self.entries.get(id)
    }

    pub fn list(&self) -> Json {
        let items: Vec<Json> = self
            .entries
            .values()
            .map(|e| {
                serde_json::json!({
                    "id": e.id,
                    "deviceType": e.device_type,
                    "verbs": e.mappings.iter().map(|m| m.verb_name.clone()).collect::<Vec<_>>(),
                })
            })
            .collect();
        Json::Array(items)
    }

    /// Dispatch a custom verb call (`system.executeNativeDriverFunction`)
    /// against a bridged driver. Typed (`Led`/`Temp`) drivers only expose the
    /// six standard verbs plus any device-type-specific verbs registered for
    /// them (`setColor` for `led`); anything else is rejected as
    /// `UnmappedVerb`.
    pub fn execute_function(
        &self,
        manager: &mut DriverManager,
        driver_id: &str,
        verb_name: &str,
        args: &Json,
    ) -> Result<Json, DriverError> {
        let entry = self
            .entries
            .get(driver_id)
            .ok_or_else(|| DriverError::NotFound(driver_id.to_string()))?;
        if !entry.mappings.iter().any(|m| m.verb_name == verb_name) {
            return Err(DriverError::UnmappedVerb {
                driver: driver_id.to_string(),
                verb: verb_name.to_string(),
            });
        }
        manager.control(driver_id, &serde_json::json!({"verb": verb_name, "args": args}))
    }
}

fn standard_mappings() -> Vec<VerbMapping> {
    ["init", "deinit", "read", "write", "control", "getStatus"]
        .iter()
        .map(|v| VerbMapping {
            verb_name: v.to_string(),
            verb_type: VerbType::infer(v),
        })
        .collect()
}

/// Build the generic [`DriverInterface`] forwarders for a native driver,
/// adapting JSON request/response shapes per device family.
fn build_interface(native: Rc<RefCell<NativeDriver>>) -> DriverInterface {
    let init = native.clone();
    let deinit = native.clone();
    let read = native.clone();
    let write = native.clone();
    let control = native.clone();
    let status = native.clone();

    DriverInterface {
        init: Box::new(move |_config| {
            // Typed drivers take their power-up state from `control`/`write`
            // calls after registration; there is no family-specific init
            // payload to adapt yet.
            match &mut *init.borrow_mut() {
                NativeDriver::Generic(hooks) => hooks.call("init", &Json::Null).map(|_| ()),
                _ => Ok(()),
            }
        }),
        deinit: Box::new(move || match &mut *deinit.borrow_mut() {
            NativeDriver::Led(led) => led.set_power(false),
            NativeDriver::Generic(hooks) => hooks.call("deinit", &Json::Null).map(|_| ()),
            NativeDriver::Temp(_) => Ok(()),
        }),
        read: Box::new(move |args| match &mut *read.borrow_mut() {
            NativeDriver::Temp(temp) => {
                let celsius = temp.read_celsius()?;
                Ok(serde_json::json!({"value": celsius, "units": "celsius"}))
            }
            NativeDriver::Led(led) => Ok(led_status_json(&led.status())),
            NativeDriver::Generic(hooks) => hooks.call("read", args),
        }),
        write: Box::new(move |args| match &mut *write.borrow_mut() {
            NativeDriver::Led(led) => {
                adapt_led_write(led.as_mut(), args)?;
                Ok(led_status_json(&led.status()))
            }
            NativeDriver::Generic(hooks) => hooks.call("write", args),
            NativeDriver::Temp(_) => Err(DriverError::BadArguments("temperature drivers are read-only".into())),
        }),
        control: Box::new(move |args| match &mut *control.borrow_mut() {
            NativeDriver::Led(led) => {
                let verb = args.get("verb").and_then(Json::as_str).unwrap_or("control");
                let inner_args = args.get("args").cloned().unwrap_or(Json::Null);
                if verb == "setColor" {
                    let r = inner_args.get("r").and_then(Json::as_u64).unwrap_or(0) as u8;
                    let g = inner_args.get("g").and_then(Json::as_u64).unwrap_or(0) as u8;
                    let b = inner_args.get("b").and_then(Json::as_u64).unwrap_or(0) as u8;
                    led.set_color(r, g, b)?;
                    return Ok(serde_json::json!({"status": "success"}));
                }
                adapt_led_write(led.as_mut(), &inner_args)?;
                Ok(led_status_json(&led.status()))
            }
            NativeDriver::Generic(hooks) => {
                let verb = args.get("verb").and_then(Json::as_str).unwrap_or("control");
                let inner_args = args.get("args").cloned().unwrap_or(Json::Null);
                hooks.call(verb, &inner_args)
            }
            NativeDriver::Temp(_) => Err(DriverError::BadArguments("temperature drivers accept no control verbs".into())),
        }),
        get_status: Box::new(move || match &mut *status.borrow_mut() {
            NativeDriver::Led(led) => Ok(led_status_json(&led.status())),
            NativeDriver::Temp(temp) => {
                let celsius = temp.read_celsius()?;
                Ok(serde_json::json!({"value": celsius, "units": "celsius"}))
            }
            NativeDriver::Generic(hooks) => hooks.call("getStatus", &Json::Null),
        }),
    }
}

fn led_status_json(status: &LedStatus) -> Json {
    serde_json::json!({
        "on": status.on,
        "brightness": status.brightness,
        "color": {"r": status.color.0, "g": status.color.1, "b": status.color.2},
    })
}

fn adapt_led_write(led: &mut dyn LedDriver, args: &Json) -> Result<(), DriverError> {
    if let Some(on) = args.get("on").and_then(Json::as_bool) {
        led.set_power(on)?;
    }
    if let Some(brightness) = args.get("brightness").and_then(Json::as_u64) {
        led.set_brightness(brightness.min(100) as u8)?;
    }
    if let Some(color) = args.get("color") {
        let r = color.get("r").and_then(Json::as_u64).unwrap_or(0) as u8;
        let g = color.get("g").and_then(Json::as_u64).unwrap_or(0) as u8;
        let b = color.get("b").and_then(Json::as_u64).unwrap_or(0) as u8;
        led.set_color(r, g, b)?;
    }
    Ok(())
}

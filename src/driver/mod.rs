//! Native hardware driver support: lifecycle management (§4.G) and the
//! device-type-aware bridge onto the tool-invocation surface (§4.H).

pub mod bridge;
pub mod manager;

pub use bridge::{
    BridgeDriverEntry, DriverBridge, GenericHooks, LedDriver, LedStatus, NativeDriver, NativeFn,
    TemperatureDriver, VerbMapping, VerbType,
};
pub use manager::{DriverInfo, DriverInterface, DriverKind, DriverManager, DriverState};

//! Device-info provider (§4.J): a read-only hardware/platform snapshot
//! populated once at boot by the host and served back verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A single I/O port summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoPort {
    pub name: String,
    pub kind: String,
    pub available: bool,
}

/// A single network interface summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    pub address: Option<String>,
    pub up: bool,
}

/// A single onboard sensor summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSummary {
    pub name: String,
    pub kind: String,
}

/// A single storage device summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDevice {
    pub name: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// The full device snapshot (§3 "Device-Info Provider").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub system: String,
    pub processor: String,
    pub memory_bytes: u64,
    pub io_ports: Vec<IoPort>,
    pub network_interfaces: Vec<NetworkInterface>,
    pub sensors: Vec<SensorSummary>,
    pub storage_devices: Vec<StorageDevice>,
    pub capabilities: Vec<String>,
}

impl DeviceInfo {
    /// An empty snapshot, to be populated by the host at boot before the
    /// runtime starts serving `device.getInfo`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Render the full snapshot as JSON.
    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }

    /// Render a compact summary: just system/processor/memory and counts,
    /// for callers that pass `{"format": "compact"}` to `device.getInfo`.
    pub fn to_compact_json(&self) -> Json {
        serde_json::json!({
            "system": self.system,
            "processor": self.processor,
            "memoryBytes": self.memory_bytes,
            "ioPortCount": self.io_ports.len(),
            "networkInterfaceCount": self.network_interfaces.len(),
            "sensorCount": self.sensors.len(),
            "storageDeviceCount": self.storage_devices.len(),
            "capabilities": self.capabilities,
        })
    }

    /// Serve `device.getInfo`, honoring an optional `{"format": "compact"}`
    /// request parameter.
    pub fn respond(&self, params: &Json) -> Json {
        let compact = params.get("format").and_then(Json::as_str) == Some("compact");
        if compact {
            self.to_compact_json()
        } else {
            self.to_json()
        }
    }
}

//! Fake device inventory advertised through ListAndWatch.

use device_plugin_pb::api;
use device_plugin_pb::HEALTHY;
use device_plugin_pb::UNHEALTHY;

/// Health of an advertised device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum DeviceHealth {
    #[display("Healthy")]
    Healthy,
    #[display("Unhealthy")]
    Unhealthy,
}

impl DeviceHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => HEALTHY,
            Self::Unhealthy => UNHEALTHY,
        }
    }
}

/// One advertised unit of the fake resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    pub health: DeviceHealth,
}

impl From<&DeviceRecord> for api::Device {
    fn from(record: &DeviceRecord) -> Self {
        api::Device {
            id: record.id.clone(),
            health: record.health.as_str().to_string(),
            topology: None,
        }
    }
}

/// Builds the device inventory from the configured naming scheme.
#[derive(Debug, Clone)]
pub struct DeviceInventory {
    prefix: String,
    unit_label: String,
    count: usize,
}

impl DeviceInventory {
    pub fn new(prefix: impl Into<String>, unit_label: impl Into<String>, count: usize) -> Self {
        Self {
            prefix: prefix.into(),
            unit_label: unit_label.into(),
            count,
        }
    }

    /// id of the device at `index`, e.g. `vgpu-memory-1MiB-7`
    pub fn device_id(&self, index: usize) -> String {
        format!("{}-{}-{index}", self.prefix, self.unit_label)
    }

    /// all devices in index order, every one healthy
    pub fn records(&self) -> Vec<DeviceRecord> {
        (0..self.count)
            .map(|index| DeviceRecord {
                id: self.device_id(index),
                health: DeviceHealth::Healthy,
            })
            .collect()
    }
}

/// Wraps a device sequence into the single ListAndWatch message pushed to kubelet.
pub fn list_and_watch_response(records: &[DeviceRecord]) -> api::ListAndWatchResponse {
    api::ListAndWatchResponse {
        devices: records.iter().map(api::Device::from).collect(),
    }
}

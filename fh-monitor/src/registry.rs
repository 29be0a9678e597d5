//! Shared live-device registry.
//!
//! Written by the monitor's watcher task, read by in-flight workflows
//! (`wait_for_device`, port lookups). All access goes through one `RwLock` so
//! the hotplug task and the orchestration loop never race.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::DeviceInfo;

#[derive(Default)]
struct Inner {
    devices: HashMap<String, DeviceInfo>,
    ports: HashMap<u8, String>,
}

/// Cheap-to-clone handle to the live set of attached devices.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, device: DeviceInfo) {
        let mut inner = self.inner.write().await;
        if let Some(port) = device.port_number {
            inner.ports.insert(port, device.device_path.clone());
        }
        inner.devices.insert(device.device_path.clone(), device);
    }

    pub async fn remove(&self, device_path: &str) -> Option<DeviceInfo> {
        let mut inner = self.inner.write().await;
        let device = inner.devices.remove(device_path)?;
        if let Some(port) = device.port_number {
            inner.ports.remove(&port);
        }
        Some(device)
    }

    pub async fn contains(&self, device_path: &str) -> bool {
        self.inner.read().await.devices.contains_key(device_path)
    }

    pub async fn get(&self, device_path: &str) -> Option<DeviceInfo> {
        self.inner.read().await.devices.get(device_path).cloned()
    }

    pub async fn all(&self) -> Vec<DeviceInfo> {
        self.inner.read().await.devices.values().cloned().collect()
    }

    /// Associate an attached device with a physical hub port. Returns false
    /// if the path is not currently attached.
    pub async fn correlate(&self, device_path: &str, port: u8) -> bool {
        let mut inner = self.inner.write().await;
        match inner.devices.get_mut(device_path) {
            Some(device) => {
                device.port_number = Some(port);
                inner.ports.insert(port, device_path.to_owned());
                info!(device_path, port, "correlated device with hub port");
                true
            }
            None => false,
        }
    }

    pub async fn device_on_port(&self, port: u8) -> Option<DeviceInfo> {
        let inner = self.inner.read().await;
        let path = inner.ports.get(&port)?;
        inner.devices.get(path).cloned()
    }
}

//! USB device monitoring for the FlashHub testbench.
//!
//! The monitor keeps a live registry of attached devices, classifies each one
//! by its vendor/product id pair, and emits add/remove events consumed by the
//! orchestration engine. Enumeration reads the sysfs USB bus tree; the root is
//! injectable so everything here is testable against a fixture directory.
//!
//! Hub-port correlation cannot come from hotplug data (the host has no idea
//! which physical hub port a bus path hangs off), so it is established either
//! by an operator call on [`DeviceRegistry::correlate`] or by a configured
//! serial-number/path to port table applied as devices appear.

mod classify;
mod registry;
mod sysfs;
mod watch;

pub use classify::classify;
pub use registry::DeviceRegistry;
pub use watch::{DeviceEvent, DeviceMonitor, MonitorConfig};

use std::time::SystemTime;

/// Identity snapshot of one attached USB device.
///
/// `device_path` is the sysfs bus path (for example `1-3.2`) and is unique
/// only while the device stays attached; a re-plug produces a fresh
/// `DeviceInfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub vendor_id: String,
    pub product_id: String,
    pub device_path: String,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub device_type: String,
    pub port_number: Option<u8>,
    pub first_seen: SystemTime,
}

impl DeviceInfo {
    /// Look up an attribute by name for rule-filter evaluation. Unset
    /// optional fields and unknown names are `None`.
    pub fn attribute(&self, key: &str) -> Option<String> {
        match key {
            "vendor_id" => Some(self.vendor_id.clone()),
            "product_id" => Some(self.product_id.clone()),
            "device_path" => Some(self.device_path.clone()),
            "serial_number" => self.serial_number.clone(),
            "manufacturer" => self.manufacturer.clone(),
            "product" => self.product.clone(),
            "device_type" => Some(self.device_type.clone()),
            "port_number" => self.port_number.map(|p| p.to_string()),
            _ => None,
        }
    }
}

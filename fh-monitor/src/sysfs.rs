//! Enumeration of attached USB devices from the sysfs bus tree.
//!
//! Every directory under the root that carries both `idVendor` and
//! `idProduct` attribute files is a device; anything with incomplete identity
//! is silently skipped since it can neither be classified nor tracked.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use tracing::trace;

use crate::{classify, DeviceInfo};

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    let value = fs::read_to_string(dir.join(name)).ok()?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

/// Scan `root` once. Results are sorted by bus path for a stable diff.
pub fn scan(root: &Path) -> std::io::Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let (Some(vendor_id), Some(product_id)) =
            (read_attr(&path, "idVendor"), read_attr(&path, "idProduct"))
        else {
            trace!(path = %path.display(), "skipping entry without full usb identity");
            continue;
        };

        let vendor_id = vendor_id.to_ascii_lowercase();
        let product_id = product_id.to_ascii_lowercase();
        let device_path = entry.file_name().to_string_lossy().into_owned();

        devices.push(DeviceInfo {
            device_type: classify(&vendor_id, &product_id).to_owned(),
            vendor_id,
            product_id,
            device_path,
            serial_number: read_attr(&path, "serial"),
            manufacturer: read_attr(&path, "manufacturer"),
            product: read_attr(&path, "product"),
            port_number: None,
            first_seen: SystemTime::now(),
        });
    }

    devices.sort_by(|a, b| a.device_path.cmp(&b.device_path));
    Ok(devices)
}

//! Hotplug watcher: periodic sysfs diff turned into add/remove events.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{sysfs, DeviceInfo, DeviceRegistry};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Added(DeviceInfo),
    Removed(DeviceInfo),
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Root of the USB bus tree. Injectable so tests run against a fixture.
    pub sysfs_root: PathBuf,
    pub poll_interval: Duration,
    /// Operator-provided correlation table: serial number or bus path to hub
    /// port. Applied when a matching device appears.
    pub port_map: HashMap<String, u8>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/bus/usb/devices"),
            poll_interval: Duration::from_millis(250),
            port_map: HashMap::new(),
        }
    }
}

/// Maintains the live device set and emits [`DeviceEvent`]s.
pub struct DeviceMonitor {
    config: MonitorConfig,
    registry: DeviceRegistry,
    cancel: CancellationToken,
}

impl DeviceMonitor {
    pub fn new(config: MonitorConfig, registry: DeviceRegistry, parent: &CancellationToken) -> Self {
        Self {
            config,
            registry,
            cancel: parent.child_token(),
        }
    }

    /// Start the watcher task and return the event stream. Devices already
    /// attached are enumerated first, each reported as an `Added` event; the
    /// enumeration runs on the watcher task, so `start` returns immediately
    /// no matter how many devices are present or how full the event channel
    /// gets. Events stop when [`stop`] is called or the parent token is
    /// cancelled; the known set is kept.
    ///
    /// [`stop`]: DeviceMonitor::stop
    pub fn start(&self) -> mpsc::Receiver<DeviceEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(watch_task(
            self.config.clone(),
            self.registry.clone(),
            self.cancel.clone(),
            tx,
        ));
        rx
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

fn apply_port_map(port_map: &HashMap<String, u8>, device: &mut DeviceInfo) {
    let port = device
        .serial_number
        .as_deref()
        .and_then(|serial| port_map.get(serial))
        .or_else(|| port_map.get(&device.device_path));
    if let Some(&port) = port {
        device.port_number = Some(port);
    }
}

/// Send an event unless the monitor is shutting down. Returns false when the
/// receiver is gone or the token fired while the channel was full.
async fn emit(tx: &mpsc::Sender<DeviceEvent>, cancel: &CancellationToken, event: DeviceEvent) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

async fn watch_task(
    config: MonitorConfig,
    registry: DeviceRegistry,
    cancel: CancellationToken,
    tx: mpsc::Sender<DeviceEvent>,
) {
    match sysfs::scan(&config.sysfs_root) {
        Ok(devices) => {
            for mut device in devices {
                apply_port_map(&config.port_map, &mut device);
                registry.insert(device.clone()).await;
                info!(
                    device_path = %device.device_path,
                    device_type = %device.device_type,
                    "found attached device"
                );
                if !emit(&tx, &cancel, DeviceEvent::Added(device)).await {
                    return;
                }
            }
        }
        Err(error) => {
            warn!(
                %error,
                root = %config.sysfs_root.display(),
                "initial usb enumeration failed"
            );
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.poll_interval) => {}
        }

        let seen = match sysfs::scan(&config.sysfs_root) {
            Ok(devices) => devices,
            Err(error) => {
                warn!(%error, "usb enumeration failed, will retry");
                continue;
            }
        };
        let seen_paths: HashSet<&str> = seen.iter().map(|d| d.device_path.as_str()).collect();

        for known in registry.all().await {
            if !seen_paths.contains(known.device_path.as_str()) {
                if let Some(device) = registry.remove(&known.device_path).await {
                    info!(device_path = %device.device_path, "device disconnected");
                    if !emit(&tx, &cancel, DeviceEvent::Removed(device)).await {
                        return;
                    }
                }
            }
        }

        for mut device in seen {
            if !registry.contains(&device.device_path).await {
                apply_port_map(&config.port_map, &mut device);
                registry.insert(device.clone()).await;
                info!(
                    device_path = %device.device_path,
                    device_type = %device.device_type,
                    "device connected"
                );
                if !emit(&tx, &cancel, DeviceEvent::Added(device)).await {
                    return;
                }
            }
        }
    }

    debug!("device watcher stopped");
}

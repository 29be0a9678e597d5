//! Passive cache of hub state built from inbound traffic.
//!
//! The hub pushes status messages on its own schedule and in response to
//! `{"cmd":"status"}`. The cache observes the link's broadcast stream and
//! keeps the last reported power level per port, without assuming any schema
//! beyond "a JSON object that may carry `port`/`power` fields or a `ports`
//! array of such objects".

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use crate::HubLink;

#[derive(Debug, Clone)]
pub struct PortPower {
    pub power: String,
    pub updated: SystemTime,
}

#[derive(Debug, Clone, Default)]
pub struct HubStatus {
    pub ports: BTreeMap<u8, PortPower>,
    pub last_message: Option<SystemTime>,
}

/// Observer that tracks hub status independently of in-flight commands.
#[derive(Clone, Default)]
pub struct StatusCache {
    inner: Arc<RwLock<HubStatus>>,
}

impl StatusCache {
    /// Subscribe to `link` and keep the cache updated for as long as the
    /// link's message stream is alive.
    pub fn attach(link: &HubLink) -> Self {
        let cache = Self::default();
        let inner = Arc::clone(&cache.inner);
        let mut rx = link.observe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => apply(&inner, &msg),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        cache
    }

    pub fn snapshot(&self) -> HubStatus {
        self.inner.read().expect("status lock poisoned").clone()
    }
}

fn apply(inner: &RwLock<HubStatus>, msg: &Value) {
    let mut status = inner.write().expect("status lock poisoned");
    status.last_message = Some(SystemTime::now());

    record_port(&mut status, msg);
    if let Some(ports) = msg.get("ports").and_then(Value::as_array) {
        for entry in ports {
            record_port(&mut status, entry);
        }
    }
}

fn record_port(status: &mut HubStatus, entry: &Value) {
    let port = entry.get("port").and_then(Value::as_u64);
    let power = entry.get("power").and_then(Value::as_str);
    if let (Some(port), Some(power)) = (port, power) {
        if let Ok(port) = u8::try_from(port) {
            status.ports.insert(
                port,
                PortPower {
                    power: power.to_owned(),
                    updated: SystemTime::now(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_single_port_and_port_array() {
        let inner = RwLock::new(HubStatus::default());

        apply(&inner, &json!({"port": 2, "power": "high"}));
        apply(
            &inner,
            &json!({"ports": [{"port": 1, "power": "off"}, {"port": 3, "power": "low"}]}),
        );
        // Messages without port data still bump the last-message marker.
        apply(&inner, &json!({"event": "heartbeat"}));

        let status = inner.read().unwrap();
        assert_eq!(status.ports.len(), 3);
        assert_eq!(status.ports[&2].power, "high");
        assert_eq!(status.ports[&3].power, "low");
        assert!(status.last_message.is_some());
    }
}

//! Shared helpers for the engine integration tests. Each test binary uses a
//! subset of these.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fh_link::HubLink;
use fh_monitor::DeviceInfo;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::mpsc,
};

/// Single-connection hub stand-in: every received command line is forwarded
/// to the returned channel as parsed JSON.
pub async fn spawn_mock_hub() -> (u16, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let msg: Value = serde_json::from_str(&line).unwrap();
            // Acknowledge everything; the engine never relies on the shape.
            let _ = write_half.write_all(b"{\"ok\":true}\n").await;
            let _ = tx.send(msg);
        }
    });

    (port, rx)
}

pub async fn connected_link() -> (HubLink, mpsc::UnboundedReceiver<Value>) {
    let (port, received) = spawn_mock_hub().await;
    let link = HubLink::new();
    link.connect("127.0.0.1", port).await.unwrap();
    (link, received)
}

pub fn make_device(path: &str, device_type: &str, port: Option<u8>) -> DeviceInfo {
    DeviceInfo {
        vendor_id: "303a".into(),
        product_id: "1001".into(),
        device_path: path.into(),
        serial_number: Some(format!("SER-{path}")),
        manufacturer: None,
        product: None,
        device_type: device_type.into(),
        port_number: port,
        first_seen: SystemTime::now(),
    }
}

/// Write an executable shell script into `dir` and return its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

//! Integration tests against a mock hub listening on localhost.

use std::time::{Duration, Instant};

use fh_link::{HubCommand, HubLink, PowerLevel, StatusCache};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::mpsc,
};

/// A single-connection hub stand-in. Forwards every received command line to
/// `received`, and writes every value posted on `push` back to the client. If
/// `reply_to_status` is set, `{"cmd":"status"}` is answered automatically.
async fn spawn_mock_hub(
    reply_to_status: bool,
) -> (
    u16,
    mpsc::UnboundedReceiver<Value>,
    mpsc::UnboundedSender<Value>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (received_tx, received_rx) = mpsc::unbounded_channel();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Value>();
    let loopback = push_tx.clone();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();

        tokio::spawn(async move {
            while let Some(msg) = push_rx.recv().await {
                let mut line = msg.to_string();
                line.push('\n');
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let msg: Value = serde_json::from_str(&line).unwrap();
            if reply_to_status && msg.get("cmd").and_then(Value::as_str) == Some("status") {
                let _ = loopback.send(json!({"ports": [{"port": 1, "power": "off"}]}));
            }
            let _ = received_tx.send(msg);
        }
    });

    (port, received_rx, push_tx)
}

#[tokio::test]
async fn connect_is_idempotent_and_commands_hit_the_wire() {
    let (port, mut received, _push) = spawn_mock_hub(false).await;
    let link = HubLink::new();

    link.connect("127.0.0.1", port).await.unwrap();
    assert!(link.is_connected());
    // Second connect while connected is a no-op.
    link.connect("127.0.0.1", port).await.unwrap();

    link.power_port(4, PowerLevel::Low).await.unwrap();
    link.pulse_reset(100).await.unwrap();
    link.set_reset(true).await.unwrap();
    link.set_boot(false).await.unwrap();
    link.all_off().await.unwrap();

    assert_eq!(
        received.recv().await.unwrap(),
        json!({"cmd": "port", "port": 4, "power": "low"})
    );
    assert_eq!(
        received.recv().await.unwrap(),
        json!({"cmd": "reset", "pulse": 100})
    );
    assert_eq!(
        received.recv().await.unwrap(),
        json!({"cmd": "reset", "state": true})
    );
    assert_eq!(
        received.recv().await.unwrap(),
        json!({"cmd": "boot", "state": false})
    );
    assert_eq!(received.recv().await.unwrap(), json!({"cmd": "alloff"}));

    link.disconnect().await;
    assert!(!link.is_connected());
}

#[tokio::test]
async fn status_round_trip_returns_hub_reply() {
    let (port, _received, _push) = spawn_mock_hub(true).await;
    let link = HubLink::new();
    link.connect("127.0.0.1", port).await.unwrap();

    let reply = link.status().await.unwrap().expect("hub should reply");
    assert_eq!(reply["ports"][0]["port"], 1);

    link.disconnect().await;
}

#[tokio::test]
async fn wait_for_response_times_out_bounded() {
    let (port, _received, _push) = spawn_mock_hub(false).await;
    let link = HubLink::with_response_timeout(Duration::from_millis(200));
    link.connect("127.0.0.1", port).await.unwrap();

    let start = Instant::now();
    let reply = link.send(&HubCommand::Status, true).await.unwrap();
    assert!(reply.is_none());
    assert!(start.elapsed() >= Duration::from_millis(150));
    assert!(start.elapsed() < Duration::from_secs(2));

    link.disconnect().await;
}

#[tokio::test]
async fn send_without_connect_fails_immediately() {
    let link = HubLink::new();
    let err = link.send(&HubCommand::Alloff, false).await.unwrap_err();
    assert!(matches!(err, fh_link::LinkError::NotConnected));
}

#[tokio::test]
async fn disconnect_twice_is_benign() {
    let (port, _received, _push) = spawn_mock_hub(false).await;
    let link = HubLink::new();
    link.connect("127.0.0.1", port).await.unwrap();

    link.disconnect().await;
    link.disconnect().await;
    assert!(!link.is_connected());
}

#[tokio::test]
async fn observers_see_unsolicited_messages() {
    let (port, _received, push) = spawn_mock_hub(false).await;
    let link = HubLink::new();
    link.connect("127.0.0.1", port).await.unwrap();

    let mut obs_a = link.observe();
    let mut obs_b = link.observe();
    let cache = StatusCache::attach(&link);

    push.send(json!({"port": 7, "power": "high"})).unwrap();

    let msg_a = tokio::time::timeout(Duration::from_secs(2), obs_a.recv())
        .await
        .unwrap()
        .unwrap();
    let msg_b = tokio::time::timeout(Duration::from_secs(2), obs_b.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg_a, msg_b);
    assert_eq!(msg_a["port"], 7);

    // The status cache is just another observer; give it a moment to apply.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = cache.snapshot();
    assert_eq!(status.ports[&7].power, "high");

    link.disconnect().await;
}

//! Command channel to the FlashHub controller.
//!
//! The hub speaks newline-delimited JSON over a single long-lived TCP
//! connection. [`HubLink`] owns that connection: commands are serialized and
//! written under a single-writer lock (the hub's control lines are one shared
//! electrical resource, so only one command may be in flight), and a reader
//! task parses inbound lines, hands one of them to a waiting `send` call if
//! requested, and fans every message out to registered observers.
//!
//! There is no automatic reconnection. A transport error flips the connected
//! flag and surfaces as an error on the failing call; callers decide whether
//! to call [`HubLink::connect`] again.

mod command;
mod status;

pub use command::{HubCommand, PowerLevel};
pub use status::{HubStatus, PortPower, StatusCache};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{broadcast, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const OBSERVER_CAPACITY: usize = 32;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("not connected to the hub")]
    NotConnected,

    #[error("timed out connecting to the hub")]
    ConnectTimeout,

    #[error("failed to encode hub command")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct Shared {
    response_timeout: Duration,
    connected: AtomicBool,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    /// Single-item handoff for a `send(.., wait_for_response: true)` caller.
    response_slot: Mutex<Option<oneshot::Sender<Value>>>,
    inbound: broadcast::Sender<Value>,
    cancel: Mutex<Option<CancellationToken>>,
}

/// Handle to the hub command channel. Cheap to clone; all clones share the
/// same connection.
#[derive(Clone)]
pub struct HubLink {
    shared: Arc<Shared>,
}

impl Default for HubLink {
    fn default() -> Self {
        Self::new()
    }
}

impl HubLink {
    pub fn new() -> Self {
        Self::with_response_timeout(RESPONSE_TIMEOUT)
    }

    /// Like [`HubLink::new`] with a custom bound on `wait_for_response`.
    pub fn with_response_timeout(response_timeout: Duration) -> Self {
        let (inbound, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                response_timeout,
                connected: AtomicBool::new(false),
                writer: tokio::sync::Mutex::new(None),
                response_slot: Mutex::new(None),
                inbound,
                cancel: Mutex::new(None),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Establish the connection. Bounded by an internal 5 second timeout.
    /// Calling this while already connected is a no-op.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), LinkError> {
        if self.is_connected() {
            return Ok(());
        }

        let addr = format!("{host}:{port}");
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| LinkError::ConnectTimeout)??;
        let (read_half, write_half) = stream.into_split();

        *self.shared.writer.lock().await = Some(write_half);
        let token = CancellationToken::new();
        *self
            .shared
            .cancel
            .lock()
            .expect("cancel lock poisoned") = Some(token.clone());
        self.shared.connected.store(true, Ordering::SeqCst);

        tokio::spawn(read_loop(Arc::clone(&self.shared), read_half, token));
        info!(%addr, "connected to hub");
        Ok(())
    }

    /// Close the connection. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        if let Some(token) = self
            .shared
            .cancel
            .lock()
            .expect("cancel lock poisoned")
            .take()
        {
            token.cancel();
        }
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    /// Subscribe to every inbound hub message, independent of any in-flight
    /// `wait_for_response` call.
    pub fn observe(&self) -> broadcast::Receiver<Value> {
        self.shared.inbound.subscribe()
    }

    /// Serialize `cmd` as one JSON line and write it. With
    /// `wait_for_response`, waits up to 5 seconds for the next inbound
    /// message and returns it; `Ok(None)` on timeout. There is no implicit
    /// reconnect: sending while disconnected fails immediately.
    pub async fn send(
        &self,
        cmd: &HubCommand,
        wait_for_response: bool,
    ) -> Result<Option<Value>, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let mut line = serde_json::to_string(cmd)?;
        line.push('\n');

        // The writer lock is held across the response wait as well, so that
        // at most one command is outstanding on the hub.
        let mut guard = self.shared.writer.lock().await;
        let writer = guard.as_mut().ok_or(LinkError::NotConnected)?;

        let response = if wait_for_response {
            let (tx, rx) = oneshot::channel();
            *self
                .shared
                .response_slot
                .lock()
                .expect("response slot poisoned") = Some(tx);
            Some(rx)
        } else {
            None
        };

        if let Err(error) = writer.write_all(line.as_bytes()).await {
            self.shared.connected.store(false, Ordering::SeqCst);
            self.take_response_slot();
            warn!(%error, "hub write failed, marking link disconnected");
            return Err(error.into());
        }
        debug!(command = line.trim_end(), "command sent");

        match response {
            None => Ok(None),
            Some(rx) => match tokio::time::timeout(self.shared.response_timeout, rx).await {
                Ok(Ok(msg)) => Ok(Some(msg)),
                Ok(Err(_)) | Err(_) => {
                    self.take_response_slot();
                    Ok(None)
                }
            },
        }
    }

    pub async fn power_port(&self, port: u8, power: PowerLevel) -> Result<(), LinkError> {
        self.send(&HubCommand::Port { port, power }, false)
            .await
            .map(|_| ())
    }

    pub async fn set_boot(&self, state: bool) -> Result<(), LinkError> {
        self.send(&HubCommand::Boot { state }, false)
            .await
            .map(|_| ())
    }

    pub async fn set_reset(&self, state: bool) -> Result<(), LinkError> {
        self.send(&HubCommand::reset_state(state), false)
            .await
            .map(|_| ())
    }

    pub async fn pulse_reset(&self, duration_ms: u64) -> Result<(), LinkError> {
        self.send(&HubCommand::reset_pulse(duration_ms), false)
            .await
            .map(|_| ())
    }

    pub async fn all_off(&self) -> Result<(), LinkError> {
        self.send(&HubCommand::Alloff, false).await.map(|_| ())
    }

    pub async fn status(&self) -> Result<Option<Value>, LinkError> {
        self.send(&HubCommand::Status, true).await
    }

    fn take_response_slot(&self) {
        self.shared
            .response_slot
            .lock()
            .expect("response slot poisoned")
            .take();
    }
}

async fn read_loop(shared: Arc<Shared>, read_half: OwnedReadHalf, cancel: CancellationToken) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(msg) => {
                        if let Some(tx) = shared
                            .response_slot
                            .lock()
                            .expect("response slot poisoned")
                            .take()
                        {
                            let _ = tx.send(msg.clone());
                        }
                        let _ = shared.inbound.send(msg);
                    }
                    Err(error) => {
                        debug!(%error, line, "ignoring unparsable hub message");
                    }
                }
            }
            Ok(None) => {
                debug!("hub closed the connection");
                break;
            }
            Err(error) => {
                warn!(%error, "hub connection read error");
                break;
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    // Drop any pending waiter so it fails fast instead of running out its
    // full timeout.
    shared
        .response_slot
        .lock()
        .expect("response slot poisoned")
        .take();
}

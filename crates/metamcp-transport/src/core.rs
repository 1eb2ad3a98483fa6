//! The shared transport contract: `start()` → ready; `send(message)` →
//! eventually delivered or error; `close()` → idempotent; an event stream
//! standing in for `onmessage`/`onclose`/`onerror` callbacks.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("operation timed out")]
    Timeout,

    #[error("cooling down, retry in {remaining_secs}s")]
    Cooldown { remaining_secs: u64 },

    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    /// Whether this error matches the "Not connected" sentinel the proxy
    /// bridge downgrades to a normal termination rather than logging as an
    /// error.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected) || self.to_string().contains("Not connected")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

/// One JSON-RPC line, a stderr log line, or a terminal condition.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One complete JSON-RPC message (request, response, or notification).
    Message(String),
    /// A stderr line from a stdio upstream, surfaced at line granularity.
    Log(String),
    /// The transport closed cleanly (our side or the peer's).
    Closed,
    /// A stdio upstream's child process exited before a clean close.
    Crashed {
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
    Error(TransportError),
}

/// Returned by `Transport::start`: the channel on which the transport
/// delivers [`TransportEvent`]s for as long as it is connected.
pub struct TransportHandle {
    pub events: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection (spawn the process / open the stream) and
    /// return a handle to its event channel. Must not be called twice
    /// without an intervening `close()`.
    async fn start(&self) -> TransportResult<TransportHandle>;

    /// Send one framed JSON-RPC message. Delivery is asynchronous; a
    /// `Some(())` return means the message was handed to the underlying
    /// stream, not that the peer acknowledged it.
    async fn send(&self, message: String) -> TransportResult<()>;

    /// Idempotent: calling `close` on an already-closed transport is a
    /// no-op that returns `Ok(())`.
    async fn close(&self) -> TransportResult<()>;

    async fn state(&self) -> TransportState;
}

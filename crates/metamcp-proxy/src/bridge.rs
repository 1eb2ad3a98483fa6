//! Bidirectional message pump between a client-facing transport and a
//! server-facing transport, used when an endpoint serves an MCP client
//! directly against one upstream (inspector mode) rather than through the
//! aggregator (§4.6).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metamcp_protocol::jsonrpc::JsonRpcMessage;
use metamcp_transport::{Transport, TransportEvent};
use parking_lot::Mutex;

type CleanupCallback = Box<dyn FnOnce() + Send>;

const NOT_CONNECTED_SENTINEL: &str = "Not connected";

/// Pumps `client <-> server` until either side closes, then closes the
/// other side exactly once and fires `on_cleanup` exactly once.
pub struct ProxyBridge {
    client: Arc<dyn Transport>,
    server: Arc<dyn Transport>,
    closing: Arc<AtomicBool>,
    on_cleanup: Arc<Mutex<Option<CleanupCallback>>>,
}

impl ProxyBridge {
    #[must_use]
    pub fn new(client: Arc<dyn Transport>, server: Arc<dyn Transport>) -> Self {
        Self {
            client,
            server,
            closing: Arc::new(AtomicBool::new(false)),
            on_cleanup: Arc::new(Mutex::new(None)),
        }
    }

    pub fn on_cleanup(&self, callback: impl FnOnce() + Send + 'static) {
        *self.on_cleanup.lock() = Some(Box::new(callback));
    }

    /// Starts both transports and spawns the two pump directions. Returns
    /// once both are running; the pumps themselves run until close.
    pub async fn run(self) -> metamcp_transport::TransportResult<()> {
        let client_handle = self.client.start().await?;
        let server_handle = self.server.start().await?;

        let to_server = {
            let server = self.server.clone();
            let client = self.client.clone();
            let closing = self.closing.clone();
            let cleanup = self.on_cleanup.clone();
            let mut events = client_handle.events;
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        TransportEvent::Message(line) => {
                            if let Err(e) = server.send(line.clone()).await {
                                forward_delivery_failure(&client, &line, &e.to_string()).await;
                            }
                        }
                        TransportEvent::Closed | TransportEvent::Crashed { .. } => break,
                        TransportEvent::Log(_) | TransportEvent::Error(_) => {}
                    }
                }
                close_once(&server, &closing, &cleanup).await;
            })
        };

        let to_client = {
            let client = self.client.clone();
            let server = self.server.clone();
            let closing = self.closing.clone();
            let cleanup = self.on_cleanup.clone();
            let mut events = server_handle.events;
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        TransportEvent::Message(line) => {
                            let _ = client.send(line).await;
                        }
                        TransportEvent::Closed | TransportEvent::Crashed { .. } => break,
                        TransportEvent::Log(_) | TransportEvent::Error(_) => {}
                    }
                }
                close_once(&client, &closing, &cleanup).await;
            })
        };

        let _ = tokio::join!(to_server, to_client);
        Ok(())
    }
}

/// Closes `other` exactly once; "Not connected" from `close()` is expected
/// (the other side may already be gone) and is not logged as an error.
/// Runs `on_cleanup` exactly once, after the second side to close.
async fn close_once(other: &Arc<dyn Transport>, closing: &AtomicBool, cleanup: &Mutex<Option<CleanupCallback>>) {
    let already_closing = closing.swap(true, Ordering::SeqCst);
    if let Err(e) = other.close().await {
        if !e.to_string().to_lowercase().contains(&NOT_CONNECTED_SENTINEL.to_lowercase()) {
            tracing::warn!(error = %e, "proxy bridge close failed");
        }
    }
    if already_closing {
        if let Some(cb) = cleanup.lock().take() {
            cb();
        }
    }
}

/// A JSON-RPC request (has `id`) that failed delivery gets a synthetic
/// `-32001` error response instead of silent drop.
async fn forward_delivery_failure(client: &Arc<dyn Transport>, original: &str, error: &str) {
    let Ok(JsonRpcMessage::Request(request)) = JsonRpcMessage::from_str(original) else {
        return;
    };
    let response = metamcp_protocol::jsonrpc::JsonRpcResponse::error(
        Some(request.id),
        metamcp_protocol::jsonrpc::JsonRpcError::not_delivered(error),
    );
    if let Ok(serialized) = response.to_line() {
        let _ = client.send(serialized).await;
    }
}

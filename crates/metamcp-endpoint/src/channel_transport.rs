//! Adapts an HTTP request/response cycle (SSE or streamable HTTP) to the
//! [`Transport`] contract, so the direct one-upstream routes (§4.9's
//! `/mcp-proxy/server/*`) can hand a client-facing half to [`ProxyBridge`]
//! the same way the aggregator hands a server-facing half to an upstream.
//!
//! [`ProxyBridge`]: metamcp_proxy::ProxyBridge

use async_trait::async_trait;
use metamcp_transport::{Transport, TransportError, TransportHandle, TransportResult, TransportState};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One side of an HTTP-mediated transport: `send()` pushes a line out over
/// `outbound` (to the browser/client), and the paired `inbound` sender lets
/// the HTTP layer feed lines in as though the remote peer had sent them.
pub struct ChannelTransport {
    outbound: mpsc::Sender<String>,
    inbound_rx: Mutex<Option<mpsc::Receiver<metamcp_transport::TransportEvent>>>,
    inbound_tx: mpsc::Sender<metamcp_transport::TransportEvent>,
    state: Mutex<TransportState>,
}

impl ChannelTransport {
    /// Returns the transport plus the sender the HTTP layer uses to deliver
    /// inbound messages (and the terminal `Closed`/`Crashed` events).
    #[must_use]
    pub fn new(outbound: mpsc::Sender<String>) -> (Self, mpsc::Sender<metamcp_transport::TransportEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(128);
        let transport = Self {
            outbound,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            inbound_tx: inbound_tx.clone(),
            state: Mutex::new(TransportState::Disconnected),
        };
        (transport, inbound_tx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn start(&self) -> TransportResult<TransportHandle> {
        let rx = self
            .inbound_rx
            .lock()
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("already started".into()))?;
        *self.state.lock() = TransportState::Connected;
        Ok(TransportHandle { events: rx })
    }

    async fn send(&self, message: String) -> TransportResult<()> {
        self.outbound.send(message).await.map_err(|_| TransportError::NotConnected)
    }

    async fn close(&self) -> TransportResult<()> {
        *self.state.lock() = TransportState::Disconnected;
        let _ = self.inbound_tx.send(metamcp_transport::TransportEvent::Closed).await;
        Ok(())
    }

    async fn state(&self) -> TransportState {
        *self.state.lock()
    }
}

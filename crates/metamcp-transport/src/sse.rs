//! SSE transport: a long-lived `GET .../sse` event stream for server→client
//! messages, paired with a companion POST endpoint (advertised by the
//! server during the handshake) for client→server messages.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex as SyncMutex;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, warn};

use crate::core::{Transport, TransportError, TransportEvent, TransportHandle, TransportResult, TransportState};

#[derive(Debug, Clone)]
pub struct SseConfig {
    pub url: String,
    pub bearer_token: Option<String>,
}

pub struct SseTransport {
    config: SseConfig,
    client: Client,
    state: Arc<SyncMutex<TransportState>>,
    /// Companion POST endpoint, learned from the server's initial `endpoint`
    /// event. `None` until the stream delivers it.
    post_endpoint: Arc<SyncMutex<Option<String>>>,
    cancel: Arc<AsyncMutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl SseTransport {
    #[must_use]
    pub fn new(config: SseConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            state: Arc::new(SyncMutex::new(TransportState::Disconnected)),
            post_endpoint: Arc::new(SyncMutex::new(None)),
            cancel: Arc::new(AsyncMutex::new(None)),
        }
    }

    fn request_builder(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(url).header("Accept", "text/event-stream");
        if let Some(ref token) = self.config.bearer_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn start(&self) -> TransportResult<TransportHandle> {
        *self.state.lock() = TransportState::Connecting;

        let mut source = EventSource::new(self.request_builder(&self.config.url))
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid SSE request: {e}")))?;

        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);
        let state = self.state.clone();
        let post_endpoint = self.post_endpoint.clone();
        let base_url = self.config.url.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => {
                        *state.lock() = TransportState::Connected;
                    }
                    Ok(Event::Message(message)) => {
                        if message.event == "endpoint" {
                            let resolved = resolve_companion_url(&base_url, &message.data);
                            *post_endpoint.lock() = Some(resolved);
                            continue;
                        }
                        if event_tx.send(TransportEvent::Message(message.data)).await.is_err() {
                            break;
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => {
                        *state.lock() = TransportState::Disconnected;
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "SSE stream error");
                        *state.lock() = TransportState::Failed;
                        let _ = event_tx
                            .send(TransportEvent::Error(TransportError::ConnectionLost(e.to_string())))
                            .await;
                        break;
                    }
                }
            }
            debug!("SSE stream task ended");
        });

        *self.cancel.lock().await = Some(handle);

        Ok(TransportHandle { events: event_rx })
    }

    async fn send(&self, message: String) -> TransportResult<()> {
        let endpoint = self
            .post_endpoint
            .lock()
            .clone()
            .ok_or_else(|| TransportError::NotConnected)?;

        let mut builder = self.client.post(&endpoint).header("Content-Type", "application/json");
        if let Some(ref token) = self.config.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .body(message)
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::SendFailed(format!(
                "companion POST returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        if let Some(handle) = self.cancel.lock().await.take() {
            handle.abort();
        }
        *self.state.lock() = TransportState::Disconnected;
        Ok(())
    }

    async fn state(&self) -> TransportState {
        *self.state.lock()
    }
}

/// The `endpoint` event's data is usually a path relative to the SSE URL's
/// origin; resolve it against the original URL if it isn't already
/// absolute.
fn resolve_companion_url(sse_url: &str, endpoint_data: &str) -> String {
    if endpoint_data.starts_with("http://") || endpoint_data.starts_with("https://") {
        return endpoint_data.to_string();
    }
    match url::Url::parse(sse_url).and_then(|base| base.join(endpoint_data)) {
        Ok(joined) => joined.to_string(),
        Err(_) => endpoint_data.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_companion_path() {
        let resolved = resolve_companion_url("http://localhost:3000/sse", "/message?sessionId=abc");
        assert_eq!(resolved, "http://localhost:3000/message?sessionId=abc");
    }

    #[test]
    fn leaves_absolute_companion_url_untouched() {
        let resolved = resolve_companion_url("http://localhost:3000/sse", "https://other/message");
        assert_eq!(resolved, "https://other/message");
    }
}

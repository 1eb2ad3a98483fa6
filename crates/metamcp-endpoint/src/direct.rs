//! Direct one-upstream proxy routes: `/mcp-proxy/server/{mcp,sse,stdio,message}`
//! (§4.6, §6). Unlike the aggregated routes, these bridge the HTTP client
//! straight onto one upstream's raw [`Transport`] via [`ProxyBridge`] —
//! no fan-out, no tool/prompt name rewriting, no `AggregatingProxy`
//! involved. This is the "inspector mode" path for talking to exactly one
//! configured server.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use metamcp_pool::connection::build_transport;
use metamcp_pool::ConnectionParams;
use metamcp_proxy::ProxyBridge;
use metamcp_store::UpstreamServerStore;
use metamcp_transport::TransportEvent;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::channel_transport::ChannelTransport;
use crate::error::{EndpointError, EndpointResult};
use crate::state::AppState;

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;
const SESSION_ID_HEADER: &str = "mcp-session-id";

/// One live bridge between an HTTP-facing client half and one upstream.
/// `outbound` is shared by the synchronous `POST /mcp` round trip and the
/// `GET /mcp` push stream: both simply pull the next line off it, so only
/// one request may be in flight on a given session at a time — an
/// accepted simplification for this passthrough path (see DESIGN.md).
pub struct DirectSession {
    inbound: mpsc::Sender<TransportEvent>,
    outbound: AsyncMutex<mpsc::Receiver<String>>,
}

#[derive(Default)]
pub struct DirectSessionRegistry {
    sessions: DashMap<String, Arc<DirectSession>>,
}

impl DirectSessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

async fn open_bridge(state: &AppState, server_uuid: Uuid) -> EndpointResult<(String, Arc<DirectSession>)> {
    let server = state.upstreams.get(server_uuid).await?;
    let params = ConnectionParams { kind: server.kind, params: server.params.clone() };
    let server_transport = build_transport(params.kind, &params.params, &state.direct_cooldown, state.docker_url_rewrite)?;

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
    let (client_transport, inbound_tx) = ChannelTransport::new(outbound_tx);

    let bridge = ProxyBridge::new(Arc::new(client_transport), server_transport);
    let session_id = Uuid::new_v4().to_string();
    let cleanup_id = session_id.clone();
    let registry = state.direct_sessions.clone();
    bridge.on_cleanup(move || registry.remove(&cleanup_id));

    tokio::spawn(async move {
        if let Err(e) = bridge.run().await {
            tracing::warn!(error = %e, "direct proxy bridge terminated with error");
        }
    });

    let session = Arc::new(DirectSession { inbound: inbound_tx, outbound: AsyncMutex::new(outbound_rx) });
    state.direct_sessions.sessions.insert(session_id.clone(), session.clone());
    Ok((session_id, session))
}

fn required_uuid(query: &HashMap<String, String>) -> EndpointResult<Uuid> {
    let raw = query.get("uuid").ok_or_else(|| EndpointError::BadRequest("missing uuid query parameter".into()))?;
    Uuid::parse_str(raw).map_err(|_| EndpointError::BadRequest("uuid query parameter is not a valid UUID".into()))
}

/// `GET /mcp-proxy/server/sse` and `GET /mcp-proxy/server/stdio`: open a
/// fresh bridge to the upstream named by `?uuid=` and stream its output.
pub async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> EndpointResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let uuid = required_uuid(&query)?;
    let (session_id, session) = open_bridge(&state, uuid).await?;

    tracing::info!(server = %uuid, session = %session_id, "direct proxy session opened");

    let connected = Event::default().event("endpoint").data(format!("message?sessionId={session_id}"));
    let stream = tokio_stream::once(Ok(connected)).chain(futures::stream::unfold(session, |session| async move {
        let mut guard = session.outbound.lock().await;
        let line = guard.recv().await;
        drop(guard);
        line.map(|l| (Ok(Event::default().event("message").data(l)), session))
    }));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `POST /mcp-proxy/server/message?sessionId=…`: delivers one client→server
/// frame into an already-open direct session.
pub async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> EndpointResult<Response> {
    let session_id = query.get("sessionId").ok_or_else(|| EndpointError::BadRequest("missing sessionId query parameter".into()))?;
    let session = state
        .direct_sessions
        .sessions
        .get(session_id)
        .map(|e| e.clone())
        .ok_or_else(|| EndpointError::NotFound(format!("unknown session: {session_id}")))?;

    session
        .inbound
        .send(TransportEvent::Message(body))
        .await
        .map_err(|_| EndpointError::NotFound("direct session no longer accepting messages".into()))?;

    Ok(StatusCode::ACCEPTED.into_response())
}

/// `POST /mcp-proxy/server/mcp`: without `mcp-session-id`, opens a fresh
/// bridge, forwards the one frame, and waits for the matching reply.
/// With the header, forwards into (and waits on) the existing session.
pub async fn mcp_post(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>, headers: HeaderMap, body: String) -> EndpointResult<Response> {
    let existing = headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);

    let (session_id, session, is_new) = match existing {
        Some(id) => {
            let session = state
                .direct_sessions
                .sessions
                .get(&id)
                .map(|e| e.clone())
                .ok_or_else(|| EndpointError::NotFound(format!("unknown session: {id}")))?;
            (id, session, false)
        }
        None => {
            let uuid = required_uuid(&query)?;
            let (session_id, session) = open_bridge(&state, uuid).await?;
            (session_id, session, true)
        }
    };

    session
        .inbound
        .send(TransportEvent::Message(body))
        .await
        .map_err(|_| EndpointError::NotFound("direct session no longer accepting messages".into()))?;

    let line = {
        let mut guard = session.outbound.lock().await;
        guard.recv().await
    };
    let Some(line) = line else {
        return Err(EndpointError::NotFound("upstream closed before replying".into()));
    };
    let value: serde_json::Value = serde_json::from_str(&line).unwrap_or(serde_json::Value::Null);

    let mut response = axum::Json(value).into_response();
    if is_new {
        if let Ok(header_value) = session_id.parse::<axum::http::HeaderValue>() {
            response.headers_mut().insert(SESSION_ID_HEADER, header_value);
        }
    }
    Ok(response)
}

/// `GET /mcp-proxy/server/mcp`: streams any further server→client frames
/// on an existing direct session (notifications between request/response
/// round trips).
pub async fn mcp_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> EndpointResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session_id = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| EndpointError::BadRequest(format!("missing {SESSION_ID_HEADER} header")))?;
    let session = state
        .direct_sessions
        .sessions
        .get(session_id)
        .map(|e| e.clone())
        .ok_or_else(|| EndpointError::NotFound(format!("unknown session: {session_id}")))?;

    let stream = futures::stream::unfold(session, |session| async move {
        let mut guard = session.outbound.lock().await;
        let line = guard.recv().await;
        drop(guard);
        line.map(|l| (Ok(Event::default().event("message").data(l)), session))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `DELETE /mcp-proxy/server/mcp`: terminates the direct session.
pub async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> EndpointResult<StatusCode> {
    let session_id = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| EndpointError::BadRequest(format!("missing {SESSION_ID_HEADER} header")))?;

    if let Some(session) = state.direct_sessions.sessions.get(session_id).map(|e| e.clone()) {
        let _ = session.inbound.send(TransportEvent::Closed).await;
    }
    state.direct_sessions.remove(session_id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_uuid_rejects_a_missing_query_parameter() {
        let query = HashMap::new();
        assert!(required_uuid(&query).is_err());
    }

    #[test]
    fn required_uuid_rejects_a_malformed_uuid() {
        let mut query = HashMap::new();
        query.insert("uuid".to_string(), "not-a-uuid".to_string());
        assert!(required_uuid(&query).is_err());
    }

    #[test]
    fn required_uuid_accepts_a_well_formed_uuid() {
        let uuid = Uuid::new_v4();
        let mut query = HashMap::new();
        query.insert("uuid".to_string(), uuid.to_string());
        assert_eq!(required_uuid(&query).unwrap(), uuid);
    }

    #[tokio::test]
    async fn direct_session_registry_remove_is_idempotent_on_an_unknown_session() {
        let registry = DirectSessionRegistry::new();
        registry.remove("never-opened");
        assert_eq!(registry.sessions.len(), 0);
    }
}

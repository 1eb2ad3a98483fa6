//! Aggregated routes: `/metamcp/<endpoint>/{sse,message,mcp,health/sessions}`
//! (§4.9, §6). Every route resolves the path's endpoint name to an
//! [`Endpoint`] row, runs it through the auth gate and rate limiter, then
//! either opens a fresh per-session [`AggregatingProxy`] or routes to an
//! existing one.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use metamcp_protocol::jsonrpc::JsonRpcMessage;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::dispatch::dispatch;
use crate::error::{EndpointError, EndpointResult};
use crate::state::AppState;

const SESSION_ID_HEADER: &str = "mcp-session-id";

async fn resolve_and_gate(
    state: &AppState,
    endpoint_name: &str,
    headers: &HeaderMap,
    query: &[(String, String)],
    remote_identifier: &str,
) -> EndpointResult<metamcp_store::Endpoint> {
    let endpoint = state
        .endpoints
        .find_by_name(endpoint_name)
        .await
        .map_err(|_| EndpointError::NotFound(format!("unknown endpoint: {endpoint_name}")))?;

    let rate_key = format!("{remote_identifier}:{}", endpoint.uuid);
    if !state.rate_limiter.check(&rate_key) {
        return Err(EndpointError::RateLimited);
    }

    state.auth_gate.authenticate(&endpoint, headers, query).await?;
    Ok(endpoint)
}

fn query_pairs(params: &HashMap<String, String>) -> Vec<(String, String)> {
    params.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn remote_identifier(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("unknown")
        .to_string()
}

fn open_session(state: &AppState, endpoint: &metamcp_store::Endpoint) -> (String, std::sync::Arc<crate::session::SessionEntry>) {
    let session_id = Uuid::new_v4().to_string();
    let entry = state.sessions.open(
        session_id.clone(),
        endpoint.namespace_uuid,
        state.pool.clone(),
        state.namespaces.clone(),
        state.upstreams.clone(),
    );
    (session_id, entry)
}

/// `GET /metamcp/<endpoint>/sse`: opens a fresh session and streams
/// server→client JSON-RPC frames as SSE `message` events.
pub async fn sse_handler(
    State(state): State<AppState>,
    Path(endpoint_name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> EndpointResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let pairs = query_pairs(&query);
    let remote = remote_identifier(&headers);
    let endpoint = resolve_and_gate(&state, &endpoint_name, &headers, &pairs, &remote).await?;

    let (session_id, entry) = open_session(&state, &endpoint);
    let rx = entry.take_receiver().expect("freshly opened session always has its receiver");

    tracing::info!(endpoint = %endpoint_name, session = %session_id, "SSE session opened");

    let connected = Event::default().event("endpoint").data(format!("message?sessionId={session_id}"));
    let stream = tokio_stream::once(Ok(connected)).chain(ReceiverStream::new(rx).map(|line| Ok(Event::default().event("message").data(line))));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `POST /metamcp/<endpoint>/message?sessionId=…`: delivers one
/// client→server JSON-RPC frame; the response (if any) is pushed onto the
/// session's SSE stream rather than returned synchronously.
pub async fn message_handler(
    State(state): State<AppState>,
    Path(endpoint_name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> EndpointResult<Response> {
    let pairs = query_pairs(&query);
    let remote = remote_identifier(&headers);
    resolve_and_gate(&state, &endpoint_name, &headers, &pairs, &remote).await?;

    let session_id = query
        .get("sessionId")
        .ok_or_else(|| EndpointError::BadRequest("missing sessionId query parameter".into()))?;
    let entry = state
        .sessions
        .get(session_id)
        .ok_or_else(|| EndpointError::NotFound(format!("unknown session: {session_id}")))?;

    let message = JsonRpcMessage::from_str(&body)
        .map_err(|e| EndpointError::BadRequest(format!("invalid JSON-RPC frame: {e}")))?;

    if let JsonRpcMessage::Request(request) = message {
        let response = dispatch(&entry.proxy, request).await;
        if let Ok(line) = serde_json::to_string(&response) {
            let _ = entry.outbound.try_send(line);
        }
    }

    Ok(StatusCode::ACCEPTED.into_response())
}

/// `POST /metamcp/<endpoint>/mcp`: streamable-HTTP aggregated transport
/// (§4.9). Without `mcp-session-id` this opens a session and answers
/// synchronously, returning the new id in the response header; with the
/// header it routes to the already-open session.
pub async fn mcp_post(
    State(state): State<AppState>,
    Path(endpoint_name): Path<String>,
    headers: HeaderMap,
    body: String,
) -> EndpointResult<Response> {
    let remote = remote_identifier(&headers);
    let endpoint = resolve_and_gate(&state, &endpoint_name, &headers, &[], &remote).await?;

    let message = JsonRpcMessage::from_str(&body)
        .map_err(|e| EndpointError::BadRequest(format!("invalid JSON-RPC frame: {e}")))?;
    let JsonRpcMessage::Request(request) = message else {
        return Ok(StatusCode::ACCEPTED.into_response());
    };

    let existing_session = headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);

    let (entry, session_id, is_new) = match existing_session {
        Some(id) => {
            let entry = state
                .sessions
                .get(&id)
                .ok_or_else(|| EndpointError::NotFound(format!("unknown session: {id}")))?;
            (entry, id, false)
        }
        None => {
            let (session_id, entry) = open_session(&state, &endpoint);
            (entry, session_id, true)
        }
    };

    let response = dispatch(&entry.proxy, request).await;
    let mut http_response = Json(response).into_response();
    if is_new {
        if let Ok(value) = session_id.parse::<axum::http::HeaderValue>() {
            http_response.headers_mut().insert(SESSION_ID_HEADER, value);
        }
    }
    Ok(http_response)
}

/// `GET /metamcp/<endpoint>/mcp`: opens the already-created session's
/// server→client SSE stream (§4.9's "subsequent GET... routed to the
/// same transport").
pub async fn mcp_get(
    State(state): State<AppState>,
    Path(endpoint_name): Path<String>,
    headers: HeaderMap,
) -> EndpointResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let remote = remote_identifier(&headers);
    resolve_and_gate(&state, &endpoint_name, &headers, &[], &remote).await?;

    let session_id = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| EndpointError::BadRequest(format!("missing {SESSION_ID_HEADER} header")))?;
    let entry = state
        .sessions
        .get(session_id)
        .ok_or_else(|| EndpointError::NotFound(format!("unknown session: {session_id}")))?;
    let rx = entry
        .take_receiver()
        .ok_or_else(|| EndpointError::BadRequest("server stream already opened for this session".into()))?;

    let stream = ReceiverStream::new(rx).map(|line: String| Ok(Event::default().event("message").data(line)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `DELETE /metamcp/<endpoint>/mcp`: terminates the session, idempotently.
pub async fn mcp_delete(
    State(state): State<AppState>,
    Path(endpoint_name): Path<String>,
    headers: HeaderMap,
) -> EndpointResult<StatusCode> {
    let remote = remote_identifier(&headers);
    resolve_and_gate(&state, &endpoint_name, &headers, &[], &remote).await?;

    let session_id = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| EndpointError::BadRequest(format!("missing {SESSION_ID_HEADER} header")))?;

    state.pool.cleanup_session(session_id).await;
    state.sessions.remove(session_id);
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /metamcp/<endpoint>/health/sessions`: session-count snapshot.
/// Process-wide rather than per-endpoint, since sessions are not
/// partitioned by endpoint in the registry — documented as an accepted
/// simplification.
pub async fn health_sessions(State(state): State<AppState>, Path(endpoint_name): Path<String>) -> EndpointResult<Json<Value>> {
    state
        .endpoints
        .find_by_name(&endpoint_name)
        .await
        .map_err(|_| EndpointError::NotFound(format!("unknown endpoint: {endpoint_name}")))?;
    Ok(Json(json!({ "sessionCount": state.sessions.session_count() })))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn remote_identifier_takes_the_first_hop_of_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(remote_identifier(&headers), "203.0.113.9");
    }

    #[test]
    fn remote_identifier_falls_back_to_unknown_without_the_header() {
        assert_eq!(remote_identifier(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn query_pairs_round_trips_every_entry() {
        let mut params = HashMap::new();
        params.insert("sessionId".to_string(), "abc".to_string());
        let pairs = query_pairs(&params);
        assert_eq!(pairs, vec![("sessionId".to_string(), "abc".to_string())]);
    }
}

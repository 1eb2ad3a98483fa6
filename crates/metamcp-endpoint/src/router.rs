//! Assembles the full external HTTP surface (§6): the aggregated and
//! direct proxy routes mounted here, plus `metamcp-auth`'s OAuth router
//! mounted at the root. Middleware follows the teacher's
//! `ServiceBuilder` layering convention (tracing, then timeout).

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use metamcp_auth::{AdminSessionValidator, AuthServerState};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{aggregated, direct};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const WELL_KNOWN_CACHE_CONTROL: &str = "public, max-age=3600";

/// Adds the `Cache-Control` header §6 requires on every well-known
/// endpoint. Narrower than a blanket cache layer since only these paths
/// are safe to cache for an hour.
async fn well_known_cache_control(request: Request<axum::body::Body>, next: Next) -> Response {
    let is_well_known = request.uri().path().starts_with("/.well-known/");
    let mut response = next.run(request).await;
    if is_well_known {
        response
            .headers_mut()
            .insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static(WELL_KNOWN_CACHE_CONTROL));
    }
    response
}

/// Builds the full router. `session_validator`/`resource`/`login_ui_path`
/// are passed separately because the OAuth authorization server has its
/// own state shape (`AuthServerState`), kept distinct per §1's
/// external-collaborator boundary around admin-session authentication.
pub fn router(
    state: AppState,
    session_validator: Arc<dyn AdminSessionValidator>,
    resource: String,
    login_ui_path: String,
) -> Router {
    let base_url = state.base_url.clone();
    let oauth = state.oauth.clone();

    let aggregated_routes = Router::new()
        .route("/metamcp/{endpoint}/sse", get(aggregated::sse_handler))
        .route("/metamcp/{endpoint}/message", post(aggregated::message_handler))
        .route("/metamcp/{endpoint}/mcp", get(aggregated::mcp_get).post(aggregated::mcp_post).delete(aggregated::mcp_delete))
        .route("/metamcp/{endpoint}/health/sessions", get(aggregated::health_sessions))
        .with_state(state.clone());

    let direct_routes = Router::new()
        .route("/mcp-proxy/server/sse", get(direct::stream_handler))
        .route("/mcp-proxy/server/stdio", get(direct::stream_handler))
        .route("/mcp-proxy/server/message", post(direct::message_handler))
        .route("/mcp-proxy/server/mcp", get(direct::mcp_get).post(direct::mcp_post).delete(direct::mcp_delete))
        .with_state(state);

    let auth_router = metamcp_auth::router(AuthServerState { oauth, session_validator, base_url, resource, login_ui_path });

    Router::new()
        .merge(aggregated_routes)
        .merge(direct_routes)
        .merge(auth_router)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(CorsLayer::permissive()),
        )
        .layer(middleware::from_fn(well_known_cache_control))
}

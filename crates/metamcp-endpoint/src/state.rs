//! Shared application state, wired explicitly by the binary crate at
//! startup (no implicit singletons, per §9's "make dependencies explicit"
//! redesign flag).

use std::sync::Arc;

use metamcp_auth::EndpointAuthGate;
use metamcp_pool::ServerPool;
use metamcp_store::{EndpointStore, NamespaceStore, OAuthStore, UpstreamServerStore};
use metamcp_transport::CooldownMap;
use metamcp_util::RateLimiter;

use crate::direct::DirectSessionRegistry;
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ServerPool>,
    pub endpoints: Arc<dyn EndpointStore>,
    pub namespaces: Arc<dyn NamespaceStore>,
    pub upstreams: Arc<dyn UpstreamServerStore>,
    /// Retained so `router()` can build the OAuth authorization server's
    /// own state without a separate parameter.
    pub oauth: Arc<dyn OAuthStore>,
    pub auth_gate: Arc<EndpointAuthGate>,
    pub rate_limiter: Arc<RateLimiter>,
    pub sessions: Arc<SessionRegistry>,
    pub direct_sessions: Arc<DirectSessionRegistry>,
    /// Stdio cooldown map for the direct one-upstream routes. Kept
    /// separate from the aggregator pool's own cooldown map since direct
    /// routes bypass the pool entirely (§4.6: they bridge a raw transport,
    /// not a pooled `UpstreamClient`).
    pub direct_cooldown: Arc<CooldownMap>,
    pub docker_url_rewrite: bool,
    pub base_url: Option<String>,
}

//! Process entry point: load configuration from the environment, wire the
//! store → pool → proxy → auth → endpoint dependency chain explicitly (no
//! implicit singletons — §9's "make dependencies explicit" redesign
//! flag), bind the HTTP surface, and shut down gracefully on signal.

mod admin;
mod config;

use std::sync::Arc;

use clap::Parser;
use metamcp_auth::EndpointAuthGate;
use metamcp_endpoint::{router, AppState, DirectSessionRegistry, SessionRegistry};
use metamcp_pool::{ErrorTracker, ServerPool};
use metamcp_store::{ApiKeyStore, EndpointStore, InMemoryStore, NamespaceStore, OAuthStore, UpstreamServerStore};
use metamcp_transport::CooldownMap;
use metamcp_util::RateLimiter;

use crate::admin::SharedSecretSessionValidator;
use crate::config::Config;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        // Tracing isn't initialized yet at this point; a configuration
        // error is fatal before there's anything to instrument.
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    }

    init_tracing();

    let store = Arc::new(InMemoryStore::new());
    let upstreams: Arc<dyn UpstreamServerStore> = store.clone();
    let namespaces: Arc<dyn NamespaceStore> = store.clone();
    let endpoints: Arc<dyn EndpointStore> = store.clone();
    let api_keys: Arc<dyn ApiKeyStore> = store.clone();
    let oauth: Arc<dyn OAuthStore> = store.clone();

    let error_tracker = Arc::new(ErrorTracker::new(upstreams.clone()));
    let pool = ServerPool::new(error_tracker, config.docker_url_rewrite);

    let auth_gate = Arc::new(EndpointAuthGate::new(api_keys, oauth.clone(), config.app_url.clone()));
    let rate_limiter = Arc::new(RateLimiter::with_defaults());

    let state = AppState {
        pool,
        endpoints,
        namespaces,
        upstreams,
        oauth,
        auth_gate,
        rate_limiter,
        sessions: Arc::new(SessionRegistry::new()),
        direct_sessions: Arc::new(DirectSessionRegistry::new()),
        direct_cooldown: Arc::new(CooldownMap::new()),
        docker_url_rewrite: config.docker_url_rewrite,
        base_url: config.app_url.clone(),
    };

    let session_validator = Arc::new(SharedSecretSessionValidator::new(config.auth_secret.clone()));
    let sweep_handle = metamcp_auth::spawn_expiry_sweep(state.oauth.clone());

    let app = router(state, session_validator, config.resource(), "/login".to_string());

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %config.bind_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %config.bind_addr, "metamcp listening");

    let result = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;
    sweep_handle.abort();

    if let Err(e) = result {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

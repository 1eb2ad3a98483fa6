//! Builds a connected, initialized [`UpstreamClient`] from a server's
//! cached connection parameters, wiring crash notification back into the
//! pool's `handleCrash` path.

use std::sync::Arc;

use metamcp_client::UpstreamClient;
use metamcp_store::{ServerKind, ServerParams};
use metamcp_transport::{
    CooldownMap, SseConfig, SseTransport, StdioConfig, StdioTransport, StreamableHttpConfig,
    StreamableHttpTransport, Transport,
};

use crate::error::{PoolError, PoolResult};

/// Builds a transport for the given params, bound to the process-wide
/// stdio cooldown map (only stdio transports consult it).
pub fn build_transport(
    kind: ServerKind,
    params: &ServerParams,
    cooldown: &Arc<CooldownMap>,
    docker_url_rewrite: bool,
) -> PoolResult<Arc<dyn Transport>> {
    match (kind, params) {
        (ServerKind::Stdio, ServerParams::Stdio { command, args, environment }) => {
            let config = StdioConfig {
                command: command.clone(),
                args: args.clone(),
                environment: environment.clone(),
                ..StdioConfig::default()
            };
            Ok(Arc::new(StdioTransport::new(config, cooldown.clone())))
        }
        (ServerKind::Sse, ServerParams::Remote { url, bearer_token }) => {
            let url = metamcp_util::rewrite_docker_url(url, docker_url_rewrite);
            Ok(Arc::new(SseTransport::new(SseConfig { url, bearer_token: bearer_token.clone() })))
        }
        (ServerKind::StreamableHttp, ServerParams::Remote { url, bearer_token }) => {
            let url = metamcp_util::rewrite_docker_url(url, docker_url_rewrite);
            Ok(Arc::new(StreamableHttpTransport::new(StreamableHttpConfig {
                url,
                bearer_token: bearer_token.clone(),
            })))
        }
        _ => Err(PoolError::Configuration("server kind does not match its params".into())),
    }
}

/// Builds, connects and initializes a client for one upstream. The caller
/// is responsible for registering a crash handler before first use if it
/// needs crash notifications (the pool does this itself).
pub async fn connect(transport: Arc<dyn Transport>) -> PoolResult<Arc<UpstreamClient>> {
    let client = Arc::new(UpstreamClient::new(transport));
    client.connect().await.map_err(|e| PoolError::ConnectionFailed(e.to_string()))?;
    client.initialize().await.map_err(|e| PoolError::ConnectionFailed(e.to_string()))?;
    Ok(client)
}

//! One aggregating MCP server instance per (namespace, session): fans
//! `tools/list`, `tools/call`, `prompts/*` and `resources/*` out over every
//! active upstream in the namespace, name-prefixing tools/prompts and
//! routing resources by URI (§4.5).

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use metamcp_client::{RequestOptions, UpstreamClient};
use metamcp_pool::{ConnectionParams, ServerPool};
use metamcp_protocol::types::{Prompt, Resource, ResourceTemplate, Tool};
use metamcp_store::{NamespaceStore, UpstreamServer, UpstreamServerStore};
use metamcp_util::sanitize::{prefixed_name, sanitize_server_name, split_prefixed_name};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ProxyError, ProxyResult};
use crate::options::operational_request_options;

/// Fired with `(method, params)` whenever an upstream sends a progress,
/// log, or list-changed notification that should be re-emitted on the
/// external server's channel.
pub type NotificationSink = Arc<dyn Fn(String, Option<Value>) + Send + Sync>;

const PROTOCOL_VERSION: &str = "2025-06-18";

/// Advertised capabilities of the unified server, per §4.5.
pub fn unified_server_name(namespace_uuid: Uuid) -> String {
    format!("metamcp-unified-{namespace_uuid}")
}

pub struct AggregatingProxy {
    namespace_uuid: Uuid,
    session_id: String,
    external_name: String,
    pool: Arc<ServerPool>,
    namespace_store: Arc<dyn NamespaceStore>,
    server_store: Arc<dyn UpstreamServerStore>,
    notification_sink: NotificationSink,

    tool_to_client: DashMap<String, Arc<UpstreamClient>>,
    tool_to_server_uuid: DashMap<String, Uuid>,
    prompt_to_client: DashMap<String, Arc<UpstreamClient>>,
    resource_to_client: DashMap<String, Arc<UpstreamClient>>,
    notified: DashSet<Uuid>,
}

impl AggregatingProxy {
    #[must_use]
    pub fn new(
        namespace_uuid: Uuid,
        session_id: String,
        pool: Arc<ServerPool>,
        namespace_store: Arc<dyn NamespaceStore>,
        server_store: Arc<dyn UpstreamServerStore>,
        notification_sink: NotificationSink,
    ) -> Self {
        Self {
            external_name: unified_server_name(namespace_uuid),
            namespace_uuid,
            session_id,
            pool,
            namespace_store,
            server_store,
            notification_sink,
            tool_to_client: DashMap::new(),
            tool_to_server_uuid: DashMap::new(),
            prompt_to_client: DashMap::new(),
            resource_to_client: DashMap::new(),
            notified: DashSet::new(),
        }
    }

    #[must_use]
    pub fn external_name(&self) -> &str {
        &self.external_name
    }

    fn is_self_reference(&self, server: &UpstreamServer, reported_name: Option<&str>) -> bool {
        server.name == self.external_name || reported_name == Some(self.external_name.as_str())
    }

    fn register_notifications(&self, uuid: Uuid, client: &Arc<UpstreamClient>) {
        if !self.notified.insert(uuid) {
            return;
        }
        for method in [
            "notifications/message",
            "notifications/progress",
            "notifications/tools/list_changed",
            "notifications/prompts/list_changed",
            "notifications/resources/list_changed",
        ] {
            let sink = self.notification_sink.clone();
            let method_owned = method.to_string();
            client.on_notification(method, Arc::new(move |params| sink(method_owned.clone(), params)));
        }
        let sink = self.notification_sink.clone();
        client.set_fallback(Arc::new(move |method, params| sink(method.to_string(), params)));
    }

    /// Resolves one namespace member to a connected session, skipping
    /// (and logging) upstreams that are unavailable or are a self-reference.
    /// Returns `None` for anything that should be skipped, never an error —
    /// per-upstream failures must never fail the aggregate fan-out.
    async fn open_member(&self, uuid: Uuid) -> Option<(UpstreamServer, Arc<UpstreamClient>)> {
        let server = match self.server_store.get(uuid).await {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(%uuid, error = %e, "skipping namespace member: store lookup failed");
                return None;
            }
        };

        let params = ConnectionParams { kind: server.kind, params: server.params.clone() };
        let client = match self.pool.get_session(&self.session_id, uuid, params).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::debug!(%uuid, "skipping namespace member: server unavailable or in ERROR");
                return None;
            }
            Err(e) => {
                tracing::warn!(%uuid, error = %e, "skipping namespace member: connection failed");
                return None;
            }
        };

        let reported_name = client.server_info().map(|i| i.server_info.name);
        if self.is_self_reference(&server, reported_name.as_deref()) {
            tracing::debug!(%uuid, "skipping namespace member: self-reference");
            return None;
        }

        self.register_notifications(uuid, &client);
        Some((server, client))
    }

    async fn namespace_members(&self) -> ProxyResult<Vec<Uuid>> {
        Ok(self.namespace_store.member_servers(self.namespace_uuid, false).await?)
    }

    /// `tools/list`: fan out, prefix, install routing, concatenate.
    pub async fn list_tools(&self) -> ProxyResult<Vec<Tool>> {
        let members = self.namespace_members().await?;
        let mut visited = HashSet::new();
        let mut tools = Vec::new();

        for uuid in members {
            if !visited.insert(uuid) {
                continue;
            }
            let Some((server, client)) = self.open_member(uuid).await else { continue };

            match client.list_tools(RequestOptions::new()).await {
                Ok(listed) => {
                    for mut tool in listed {
                        let prefixed = prefixed_name(&server.name, &tool.name);
                        self.tool_to_client.insert(prefixed.clone(), client.clone());
                        self.tool_to_server_uuid.insert(prefixed.clone(), uuid);
                        tool.name = prefixed;
                        tools.push(tool);
                    }
                }
                Err(e) => tracing::warn!(%uuid, error = %e, "tools/list failed on upstream"),
            }
        }

        Ok(tools)
    }

    /// Re-resolves routing for a miss by scanning every namespace member
    /// until the sanitized prefix matches and the tool is actually
    /// advertised, memoizing every tool found along the way.
    async fn resolve_tool_routing(&self, prefix: &str) -> ProxyResult<()> {
        let members = self.namespace_members().await?;
        for uuid in members {
            let Some((server, client)) = self.open_member(uuid).await else { continue };
            if sanitize_server_name(&server.name) != prefix {
                continue;
            }
            if let Ok(listed) = client.list_tools(RequestOptions::new()).await {
                for tool in listed {
                    let prefixed = prefixed_name(&server.name, &tool.name);
                    self.tool_to_client.insert(prefixed.clone(), client.clone());
                    self.tool_to_server_uuid.insert(prefixed, uuid);
                }
            }
        }
        Ok(())
    }

    /// `tools/call`: split on the first `__`, route, and forward with the
    /// operational timeout/progress options.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> ProxyResult<Value> {
        let (prefix, forwarded) =
            split_prefixed_name(name).ok_or_else(|| ProxyError::NotFound(name.to_string()))?;

        if !self.tool_to_client.contains_key(name) {
            self.resolve_tool_routing(prefix).await?;
        }

        let client = self
            .tool_to_client
            .get(name)
            .map(|r| r.clone())
            .ok_or_else(|| ProxyError::NotFound(name.to_string()))?;

        Ok(client.call_tool(forwarded, arguments, operational_request_options()).await?)
    }

    /// `prompts/list`: identical fan-out/prefix/routing pattern as tools.
    pub async fn list_prompts(&self) -> ProxyResult<Vec<Prompt>> {
        let members = self.namespace_members().await?;
        let mut visited = HashSet::new();
        let mut prompts = Vec::new();

        for uuid in members {
            if !visited.insert(uuid) {
                continue;
            }
            let Some((server, client)) = self.open_member(uuid).await else { continue };

            match client.list_prompts(RequestOptions::new()).await {
                Ok(listed) => {
                    for mut prompt in listed {
                        let prefixed = prefixed_name(&server.name, &prompt.name);
                        self.prompt_to_client.insert(prefixed.clone(), client.clone());
                        prompt.name = prefixed;
                        prompts.push(prompt);
                    }
                }
                Err(e) => tracing::warn!(%uuid, error = %e, "prompts/list failed on upstream"),
            }
        }

        Ok(prompts)
    }

    async fn resolve_prompt_routing(&self, prefix: &str) -> ProxyResult<()> {
        let members = self.namespace_members().await?;
        for uuid in members {
            let Some((server, client)) = self.open_member(uuid).await else { continue };
            if sanitize_server_name(&server.name) != prefix {
                continue;
            }
            if let Ok(listed) = client.list_prompts(RequestOptions::new()).await {
                for prompt in listed {
                    let prefixed = prefixed_name(&server.name, &prompt.name);
                    self.prompt_to_client.insert(prefixed, client.clone());
                }
            }
        }
        Ok(())
    }

    /// `prompts/get`.
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> ProxyResult<Value> {
        let (prefix, forwarded) =
            split_prefixed_name(name).ok_or_else(|| ProxyError::NotFound(name.to_string()))?;

        if !self.prompt_to_client.contains_key(name) {
            self.resolve_prompt_routing(prefix).await?;
        }

        let client = self
            .prompt_to_client
            .get(name)
            .map(|r| r.clone())
            .ok_or_else(|| ProxyError::NotFound(name.to_string()))?;

        Ok(client.get_prompt(forwarded, arguments, operational_request_options()).await?)
    }

    /// `resources/list`: keyed externally by URI, no prefixing (URIs are
    /// globally unique by construction).
    pub async fn list_resources(&self) -> ProxyResult<Vec<Resource>> {
        let members = self.namespace_members().await?;
        let mut visited = HashSet::new();
        let mut resources = Vec::new();

        for uuid in members {
            if !visited.insert(uuid) {
                continue;
            }
            let Some((_, client)) = self.open_member(uuid).await else { continue };

            match client.list_resources(RequestOptions::new()).await {
                Ok(listed) => {
                    for resource in listed {
                        self.resource_to_client.insert(resource.uri.clone(), client.clone());
                        resources.push(resource);
                    }
                }
                Err(e) => tracing::warn!(%uuid, error = %e, "resources/list failed on upstream"),
            }
        }

        Ok(resources)
    }

    /// `resources/read`: consults URI→upstream routing recorded on list;
    /// re-resolves by scanning members on a miss.
    pub async fn read_resource(&self, uri: &str) -> ProxyResult<Value> {
        if !self.resource_to_client.contains_key(uri) {
            self.list_resources().await?;
        }
        let client = self
            .resource_to_client
            .get(uri)
            .map(|r| r.clone())
            .ok_or_else(|| ProxyError::NotFound(uri.to_string()))?;

        Ok(client.read_resource(uri, operational_request_options()).await?)
    }

    /// `resources/templates/list`: same fan-out; templates have no
    /// per-read routing to maintain.
    pub async fn list_resource_templates(&self) -> ProxyResult<Vec<ResourceTemplate>> {
        let members = self.namespace_members().await?;
        let mut visited = HashSet::new();
        let mut templates = Vec::new();

        for uuid in members {
            if !visited.insert(uuid) {
                continue;
            }
            let Some((_, client)) = self.open_member(uuid).await else { continue };

            match client.list_resource_templates(RequestOptions::new()).await {
                Ok(listed) => templates.extend(listed),
                Err(e) => tracing::warn!(%uuid, error = %e, "resources/templates/list failed on upstream"),
            }
        }

        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unified_server_name_matches_spec_format() {
        let uuid = Uuid::nil();
        assert_eq!(unified_server_name(uuid), format!("metamcp-unified-{uuid}"));
    }

    #[test]
    fn self_reference_detected_by_configured_or_reported_name() {
        let namespace_uuid = Uuid::new_v4();
        let external = unified_server_name(namespace_uuid);

        let server = UpstreamServer {
            uuid: Uuid::new_v4(),
            name: external.clone(),
            kind: metamcp_store::ServerKind::Stdio,
            params: metamcp_store::ServerParams::Stdio {
                command: "echo".into(),
                args: vec![],
                environment: std::collections::HashMap::new(),
            },
            error_status: metamcp_store::ErrorStatus::None,
            max_attempts: None,
        };

        // Stand up just enough of a proxy to exercise `is_self_reference`
        // without a real store/pool.
        let proxy = AggregatingProxy {
            external_name: external.clone(),
            namespace_uuid,
            session_id: "s".into(),
            pool: dummy_pool(),
            namespace_store: dummy_store(),
            server_store: dummy_store(),
            notification_sink: Arc::new(|_, _| {}),
            tool_to_client: DashMap::new(),
            tool_to_server_uuid: DashMap::new(),
            prompt_to_client: DashMap::new(),
            resource_to_client: DashMap::new(),
            notified: DashSet::new(),
        };

        assert!(proxy.is_self_reference(&server, None));

        let mut other = server.clone();
        other.name = "Alpha".into();
        assert!(!proxy.is_self_reference(&other, None));
        assert!(proxy.is_self_reference(&other, Some(external.as_str())));
    }

    fn dummy_pool() -> Arc<ServerPool> {
        ServerPool::new(Arc::new(metamcp_pool::ErrorTracker::new(Arc::new(metamcp_store::InMemoryStore::new()))), false)
    }

    fn dummy_store() -> Arc<metamcp_store::InMemoryStore> {
        Arc::new(metamcp_store::InMemoryStore::new())
    }
}

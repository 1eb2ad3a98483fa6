//! In-memory implementation of every store trait. Used by tests and as the
//! default backing for the binary when no external database is configured.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::traits::{ApiKeyStore, EndpointStore, NamespaceStore, OAuthStore, UpstreamServerStore};
use crate::types::{
    AccessToken, ApiKey, AuthorizationCode, Endpoint, ErrorStatus, Namespace,
    NamespaceServerStatus, OAuthClient, UpstreamServer,
};

#[derive(Default)]
pub struct InMemoryStore {
    pub servers: DashMap<Uuid, UpstreamServer>,
    pub namespaces: DashMap<Uuid, Namespace>,
    pub endpoints: DashMap<Uuid, Endpoint>,
    pub api_keys: DashMap<String, ApiKey>,
    pub oauth_clients: DashMap<String, OAuthClient>,
    pub oauth_codes: DashMap<String, AuthorizationCode>,
    pub oauth_tokens: DashMap<String, AccessToken>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_server(&self, server: UpstreamServer) {
        self.servers.insert(server.uuid, server);
    }

    pub fn insert_namespace(&self, namespace: Namespace) {
        self.namespaces.insert(namespace.uuid, namespace);
    }

    pub fn insert_endpoint(&self, endpoint: Endpoint) {
        self.endpoints.insert(endpoint.uuid, endpoint);
    }

    pub fn insert_api_key(&self, key: ApiKey) {
        self.api_keys.insert(key.hash.clone(), key);
    }
}

#[async_trait]
impl UpstreamServerStore for InMemoryStore {
    async fn get(&self, uuid: Uuid) -> Result<UpstreamServer> {
        self.servers.get(&uuid).map(|r| r.clone()).ok_or(StoreError::NotFound)
    }

    async fn error_status(&self, uuid: Uuid) -> Result<ErrorStatus> {
        self.servers
            .get(&uuid)
            .map(|r| r.error_status)
            .ok_or(StoreError::NotFound)
    }

    async fn set_error_status(&self, uuid: Uuid, status: ErrorStatus) -> Result<()> {
        self.servers
            .get_mut(&uuid)
            .map(|mut r| r.error_status = status)
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl NamespaceStore for InMemoryStore {
    async fn get(&self, uuid: Uuid) -> Result<Namespace> {
        self.namespaces.get(&uuid).map(|r| r.clone()).ok_or(StoreError::NotFound)
    }

    async fn find_by_name(&self, name: &str) -> Result<Namespace> {
        self.namespaces
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn member_servers(&self, namespace_uuid: Uuid, include_inactive: bool) -> Result<Vec<Uuid>> {
        let ns = self.get(namespace_uuid).await?;
        Ok(ns
            .servers
            .into_iter()
            .filter(|(_, status)| include_inactive || *status == NamespaceServerStatus::Active)
            .map(|(uuid, _)| uuid)
            .collect())
    }
}

#[async_trait]
impl EndpointStore for InMemoryStore {
    async fn get(&self, uuid: Uuid) -> Result<Endpoint> {
        self.endpoints.get(&uuid).map(|r| r.clone()).ok_or(StoreError::NotFound)
    }

    async fn find_by_name(&self, name: &str) -> Result<Endpoint> {
        self.endpoints
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.clone())
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryStore {
    async fn find_by_hash(&self, hash: &str) -> Result<ApiKey> {
        self.api_keys.get(hash).map(|r| r.clone()).ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl OAuthStore for InMemoryStore {
    async fn upsert_client(&self, client: OAuthClient) -> Result<OAuthClient> {
        self.oauth_clients.insert(client.client_id.clone(), client.clone());
        Ok(client)
    }

    async fn find_client(&self, client_id: &str) -> Result<OAuthClient> {
        self.oauth_clients
            .get(client_id)
            .map(|r| r.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn insert_code(&self, code: AuthorizationCode) -> Result<()> {
        self.oauth_codes.insert(code.code.clone(), code);
        Ok(())
    }

    async fn take_code(&self, code: &str) -> Result<AuthorizationCode> {
        self.oauth_codes
            .remove(code)
            .map(|(_, v)| v)
            .ok_or(StoreError::NotFound)
    }

    async fn insert_token(&self, token: AccessToken) -> Result<()> {
        self.oauth_tokens.insert(token.token.clone(), token);
        Ok(())
    }

    async fn find_token(&self, token: &str) -> Result<AccessToken> {
        self.oauth_tokens
            .get(token)
            .map(|r| r.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn delete_token(&self, token: &str) -> Result<()> {
        self.oauth_tokens.remove(token);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut removed = 0u64;
        self.oauth_codes.retain(|_, v| {
            let keep = v.expires_at > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        self.oauth_tokens.retain(|_, v| {
            let keep = v.expires_at > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::types::{ServerKind, ServerParams};

    fn stdio_server(uuid: Uuid) -> UpstreamServer {
        UpstreamServer {
            uuid,
            name: "alpha".into(),
            kind: ServerKind::Stdio,
            params: ServerParams::Stdio {
                command: "echo".into(),
                args: vec![],
                environment: HashMap::new(),
            },
            error_status: ErrorStatus::None,
            max_attempts: None,
        }
    }

    #[tokio::test]
    async fn promotes_and_resets_error_status() {
        let store = InMemoryStore::new();
        let uuid = Uuid::new_v4();
        store.insert_server(stdio_server(uuid));

        assert_eq!(store.error_status(uuid).await.unwrap(), ErrorStatus::None);
        store.set_error_status(uuid, ErrorStatus::Error).await.unwrap();
        assert_eq!(store.error_status(uuid).await.unwrap(), ErrorStatus::Error);
        store.set_error_status(uuid, ErrorStatus::None).await.unwrap();
        assert_eq!(store.error_status(uuid).await.unwrap(), ErrorStatus::None);
    }

    #[tokio::test]
    async fn member_servers_filters_inactive_by_default() {
        let store = InMemoryStore::new();
        let ns_uuid = Uuid::new_v4();
        let active = Uuid::new_v4();
        let inactive = Uuid::new_v4();
        store.insert_namespace(Namespace {
            uuid: ns_uuid,
            name: "prod".into(),
            servers: vec![
                (active, NamespaceServerStatus::Active),
                (inactive, NamespaceServerStatus::Inactive),
            ],
        });

        let active_only = store.member_servers(ns_uuid, false).await.unwrap();
        assert_eq!(active_only, vec![active]);

        let mut all = store.member_servers(ns_uuid, true).await.unwrap();
        all.sort();
        let mut expected = vec![active, inactive];
        expected.sort();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn sweep_expired_removes_only_expired_rows() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .insert_token(AccessToken {
                token: "mcp_token_live".into(),
                client_id: "c".into(),
                user_id: "u".into(),
                scope: "admin".into(),
                expires_at: now + chrono::Duration::hours(1),
                issued_at: now,
            })
            .await
            .unwrap();
        store
            .insert_token(AccessToken {
                token: "mcp_token_dead".into(),
                client_id: "c".into(),
                user_id: "u".into(),
                scope: "admin".into(),
                expires_at: now - chrono::Duration::hours(1),
                issued_at: now - chrono::Duration::hours(2),
            })
            .await
            .unwrap();

        let removed = store.sweep_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.find_token("mcp_token_live").await.is_ok());
        assert!(store.find_token("mcp_token_dead").await.is_err());
    }
}

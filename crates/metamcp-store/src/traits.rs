use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    AccessToken, ApiKey, AuthorizationCode, Endpoint, ErrorStatus, Namespace, OAuthClient,
    UpstreamServer,
};

/// Upstream server rows. `set_error_status` is the write path the error
/// tracker and pool use to promote/reset a server.
#[async_trait]
pub trait UpstreamServerStore: Send + Sync {
    async fn get(&self, uuid: Uuid) -> Result<UpstreamServer>;
    async fn error_status(&self, uuid: Uuid) -> Result<ErrorStatus>;
    async fn set_error_status(&self, uuid: Uuid, status: ErrorStatus) -> Result<()>;
}

/// Namespace membership, used by the aggregating proxy to resolve the set
/// of upstreams to fan out to.
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    async fn get(&self, uuid: Uuid) -> Result<Namespace>;
    async fn find_by_name(&self, name: &str) -> Result<Namespace>;

    /// Active member UUIDs; `include_inactive` opts a caller in to the full set.
    async fn member_servers(&self, namespace_uuid: Uuid, include_inactive: bool) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn get(&self, uuid: Uuid) -> Result<Endpoint>;
    async fn find_by_name(&self, name: &str) -> Result<Endpoint>;
}

/// API keys are looked up by hash; the caller hashes the presented secret
/// before calling in, so the store never sees plaintext.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn find_by_hash(&self, hash: &str) -> Result<ApiKey>;
}

/// OAuth client/code/token tables, plus the 5-minute expiry sweep.
#[async_trait]
pub trait OAuthStore: Send + Sync {
    async fn upsert_client(&self, client: OAuthClient) -> Result<OAuthClient>;
    async fn find_client(&self, client_id: &str) -> Result<OAuthClient>;

    async fn insert_code(&self, code: AuthorizationCode) -> Result<()>;
    async fn take_code(&self, code: &str) -> Result<AuthorizationCode>;

    async fn insert_token(&self, token: AccessToken) -> Result<()>;
    async fn find_token(&self, token: &str) -> Result<AccessToken>;
    async fn delete_token(&self, token: &str) -> Result<()>;

    /// Deletes expired codes and tokens; returns the number removed.
    async fn sweep_expired(&self) -> Result<u64>;
}

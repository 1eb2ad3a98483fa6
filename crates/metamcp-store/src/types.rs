use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the three transport families a server row can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerKind {
    Stdio,
    Sse,
    StreamableHttp,
}

/// Terminal until an operator resets it back to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStatus {
    None,
    Error,
}

/// Connection parameters for one of the three kinds. Carried verbatim into
/// `paramsCache` by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerParams {
    Stdio {
        command: String,
        args: Vec<String>,
        environment: HashMap<String, String>,
    },
    Remote {
        url: String,
        bearer_token: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct UpstreamServer {
    pub uuid: Uuid,
    pub name: String,
    pub kind: ServerKind,
    pub params: ServerParams,
    pub error_status: ErrorStatus,
    pub max_attempts: Option<u32>,
}

impl UpstreamServer {
    /// Invariant from the data model: STDIO carries a non-empty command,
    /// remote kinds carry a URL. Violations are a store bug, not user input.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match (&self.kind, &self.params) {
            (ServerKind::Stdio, ServerParams::Stdio { command, .. }) => !command.is_empty(),
            (ServerKind::Sse | ServerKind::StreamableHttp, ServerParams::Remote { url, .. }) => {
                !url.is_empty()
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NamespaceServerStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone)]
pub struct Namespace {
    pub uuid: Uuid,
    pub name: String,
    /// Member servers and their per-mapping status.
    pub servers: Vec<(Uuid, NamespaceServerStatus)>,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub uuid: Uuid,
    pub name: String,
    pub namespace_uuid: Uuid,
    pub enable_api_key_auth: bool,
    pub enable_oauth: bool,
    pub use_query_param_auth: bool,
    pub user_id: Option<String>,
}

impl Endpoint {
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.user_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ApiKey {
    /// Stored hashed; never held as plaintext outside the request path.
    pub hash: String,
    pub is_active: bool,
    pub user_id: Option<String>,
}

impl ApiKey {
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.user_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    None,
    ClientSecretPost,
    ClientSecretBasic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
}

#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<GrantType>,
    /// Only "code" is ever accepted, but kept as a set per the data model.
    pub response_types: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CodeChallengeMethod {
    S256,
    Plain,
}

#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub user_id: String,
    pub code_challenge: String,
    pub code_challenge_method: CodeChallengeMethod,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

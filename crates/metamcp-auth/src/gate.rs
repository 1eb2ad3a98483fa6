//! Endpoint authentication gate (§4.8): the four `(api_key, oauth)` flag
//! combinations on an endpoint row, each driving a distinct response to
//! "no token" / "API-key-shaped token" / "OAuth-shaped token". This
//! partitioning is implemented literally — do not collapse the branches,
//! even where they look similar — because MCP inspectors oscillate between
//! challenge types when the gate's responses drift even slightly.

use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use metamcp_store::{ApiKeyStore, Endpoint, OAuthStore};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, AuthResult};

const MCP_TOKEN_PREFIX: &str = "mcp_token_";

/// What the gate let through: `None` for an anonymous pass-through
/// (both flags off), `Some(user_id)` for an authenticated caller.
pub type GateIdentity = Option<String>;

#[derive(Debug, Clone)]
enum Presented {
    ApiKeyLike(String),
    OAuthLike(String),
}

pub struct EndpointAuthGate {
    api_keys: Arc<dyn ApiKeyStore>,
    oauth: Arc<dyn OAuthStore>,
    base_url: Option<String>,
}

impl EndpointAuthGate {
    #[must_use]
    pub fn new(api_keys: Arc<dyn ApiKeyStore>, oauth: Arc<dyn OAuthStore>, base_url: Option<String>) -> Self {
        Self { api_keys, oauth, base_url }
    }

    pub async fn authenticate(
        &self,
        endpoint: &Endpoint,
        headers: &HeaderMap,
        query: &[(String, String)],
    ) -> AuthResult<GateIdentity> {
        let token = extract_token(headers, query, endpoint.use_query_param_auth);

        match (endpoint.enable_api_key_auth, endpoint.enable_oauth) {
            (false, false) => Ok(None),
            (true, false) => self.gate_api_key_only(endpoint, token).await,
            (false, true) => self.gate_oauth_only(endpoint, token, headers).await,
            (true, true) => self.gate_both(endpoint, token, headers).await,
        }
    }

    async fn gate_api_key_only(&self, endpoint: &Endpoint, token: Option<Presented>) -> AuthResult<GateIdentity> {
        match token {
            None => Err(AuthError::MissingApiKey),
            Some(Presented::ApiKeyLike(v)) => self.validate_api_key(endpoint, &v).await,
            Some(Presented::OAuthLike(v)) => {
                self.validate_api_key(endpoint, &v).await.map_err(|_| AuthError::InvalidApiKey)
            }
        }
    }

    async fn gate_oauth_only(
        &self,
        endpoint: &Endpoint,
        token: Option<Presented>,
        headers: &HeaderMap,
    ) -> AuthResult<GateIdentity> {
        match token {
            None => Err(www_authenticate_challenge(&self.base_url, headers)),
            Some(Presented::ApiKeyLike(_)) => Err(AuthError::InvalidCredentials),
            Some(Presented::OAuthLike(v)) => self.validate_oauth(endpoint, &v).await,
        }
    }

    async fn gate_both(
        &self,
        endpoint: &Endpoint,
        token: Option<Presented>,
        headers: &HeaderMap,
    ) -> AuthResult<GateIdentity> {
        match token {
            None => Err(www_authenticate_challenge(&self.base_url, headers)),
            Some(Presented::ApiKeyLike(v)) => match self.validate_api_key(endpoint, &v).await {
                Ok(identity) => Ok(identity),
                Err(_) => self.validate_oauth(endpoint, &v).await.map_err(|_| AuthError::InvalidCredentials),
            },
            Some(Presented::OAuthLike(v)) => match self.validate_oauth(endpoint, &v).await {
                Ok(identity) => Ok(identity),
                Err(_) => self.validate_api_key(endpoint, &v).await.map_err(|_| AuthError::InvalidCredentials),
            },
        }
    }

    async fn validate_api_key(&self, endpoint: &Endpoint, value: &str) -> AuthResult<GateIdentity> {
        let hash = hash_api_key(value);
        let key = self.api_keys.find_by_hash(&hash).await.map_err(|_| AuthError::InvalidApiKey)?;
        if !key.is_active {
            return Err(AuthError::InvalidApiKey);
        }
        if key.is_public() {
            if endpoint.is_private() {
                return Err(AuthError::Forbidden);
            }
        } else if endpoint.is_private() && endpoint.user_id != key.user_id {
            return Err(AuthError::Forbidden);
        }
        Ok(key.user_id)
    }

    async fn validate_oauth(&self, endpoint: &Endpoint, token: &str) -> AuthResult<GateIdentity> {
        let access = self.oauth.find_token(token).await.map_err(|_| AuthError::InvalidToken)?;
        if access.expires_at <= Utc::now() {
            return Err(AuthError::InvalidToken);
        }
        if endpoint.is_private() && endpoint.user_id.as_deref() != Some(access.user_id.as_str()) {
            return Err(AuthError::Forbidden);
        }
        Ok(Some(access.user_id))
    }
}

fn extract_token(headers: &HeaderMap, query: &[(String, String)], use_query_param_auth: bool) -> Option<Presented> {
    if let Some(v) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(Presented::ApiKeyLike(v.to_string()));
    }
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(bearer) = auth.strip_prefix("Bearer ") {
            return Some(classify(bearer));
        }
    }
    if use_query_param_auth {
        let found = query.iter().find(|(k, _)| k == "api_key" || k == "apikey");
        if let Some((_, v)) = found {
            return Some(classify(v));
        }
    }
    None
}

fn classify(value: &str) -> Presented {
    if value.starts_with(MCP_TOKEN_PREFIX) {
        Presented::OAuthLike(value.to_string())
    } else {
        Presented::ApiKeyLike(value.to_string())
    }
}

fn hash_api_key(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Prefers the environment-configured absolute URL, then the
/// `X-Forwarded-*` pair, then the request's own scheme/host.
#[must_use]
pub fn derive_base_url(configured: &Option<String>, headers: &HeaderMap, request_scheme: &str, request_host: &str) -> String {
    if let Some(url) = configured {
        return url.trim_end_matches('/').to_string();
    }
    let forwarded_host = headers.get("x-forwarded-host").and_then(|v| v.to_str().ok());
    let forwarded_proto = headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok());
    match (forwarded_proto, forwarded_host) {
        (Some(proto), Some(host)) => format!("{proto}://{host}"),
        (None, Some(host)) => format!("{request_scheme}://{host}"),
        _ => format!("{request_scheme}://{request_host}"),
    }
}

fn www_authenticate_challenge(base_url: &Option<String>, headers: &HeaderMap) -> AuthError {
    let base = derive_base_url(base_url, headers, "https", "localhost");
    AuthError::OAuthChallenge(format!(
        "Bearer realm=\"MetaMCP\", scope=\"admin\", resource_metadata=\"{base}/.well-known/oauth-protected-resource\""
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(), v.parse().unwrap());
        }
        h
    }

    #[test]
    fn x_api_key_header_takes_precedence_over_bearer() {
        let headers = headers_with(&[("x-api-key", "plainkey"), ("authorization", "Bearer mcp_token_abc")]);
        let token = extract_token(&headers, &[], false);
        assert!(matches!(token, Some(Presented::ApiKeyLike(v)) if v == "plainkey"));
    }

    #[test]
    fn bearer_mcp_token_prefix_is_always_oauth() {
        let headers = headers_with(&[("authorization", "Bearer mcp_token_xyz")]);
        let token = extract_token(&headers, &[], false);
        assert!(matches!(token, Some(Presented::OAuthLike(v)) if v == "mcp_token_xyz"));
    }

    #[test]
    fn query_param_ignored_unless_enabled() {
        let headers = HeaderMap::new();
        let query = vec![("api_key".to_string(), "qkey".to_string())];
        assert!(extract_token(&headers, &query, false).is_none());
        assert!(extract_token(&headers, &query, true).is_some());
    }

    #[test]
    fn derive_base_url_prefers_configured_value() {
        let headers = HeaderMap::new();
        let configured = Some("https://meta.example.com/".to_string());
        assert_eq!(derive_base_url(&configured, &headers, "http", "localhost"), "https://meta.example.com");
    }

    #[test]
    fn derive_base_url_falls_back_to_forwarded_headers() {
        let headers = headers_with(&[("x-forwarded-host", "public.example.com"), ("x-forwarded-proto", "https")]);
        assert_eq!(derive_base_url(&None, &headers, "http", "localhost"), "https://public.example.com");
    }
}

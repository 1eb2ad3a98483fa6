//! Dynamic client registration (§4.7): validates an incoming registration
//! request and turns it into a stored [`OAuthClient`].

use metamcp_store::{GrantType, OAuthClient, TokenEndpointAuthMethod};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, AuthResult};

#[derive(Debug, Deserialize)]
pub struct RegistrationRequest {
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
    #[serde(default)]
    pub response_types: Option<Vec<String>>,
    #[serde(default)]
    pub client_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub token_endpoint_auth_method: &'static str,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<&'static str>,
    pub response_types: Vec<String>,
}

/// Validates `request` and builds the client row to persist, plus the
/// plaintext response to hand back (the only time the secret is visible).
pub fn validate_and_build(request: RegistrationRequest) -> AuthResult<(OAuthClient, String)> {
    if request.redirect_uris.is_empty() {
        return Err(AuthError::InvalidRequest("redirect_uris must not be empty".into()));
    }
    for uri in &request.redirect_uris {
        validate_redirect_uri(uri)?;
    }

    let auth_method = match request.token_endpoint_auth_method.as_deref() {
        None | Some("none") => TokenEndpointAuthMethod::None,
        Some("client_secret_post") => TokenEndpointAuthMethod::ClientSecretPost,
        Some("client_secret_basic") => TokenEndpointAuthMethod::ClientSecretBasic,
        Some(other) => {
            return Err(AuthError::InvalidRequest(format!(
                "unsupported token_endpoint_auth_method: {other}"
            )));
        }
    };

    let grant_types = match request.grant_types {
        None => vec![GrantType::AuthorizationCode],
        Some(requested) => {
            let mut parsed = Vec::with_capacity(requested.len());
            for g in requested {
                parsed.push(parse_grant_type(&g)?);
            }
            parsed
        }
    };

    let response_types = request.response_types.unwrap_or_else(|| vec!["code".to_string()]);
    for rt in &response_types {
        if rt != "code" {
            return Err(AuthError::InvalidRequest(format!("unsupported response_type: {rt}")));
        }
    }

    let client_id = format!("mcp_client_{}", random_token(24));
    let client_secret = if matches!(auth_method, TokenEndpointAuthMethod::None) {
        None
    } else {
        Some(random_token(48))
    };

    let client = OAuthClient {
        client_id: client_id.clone(),
        client_secret: client_secret.clone(),
        token_endpoint_auth_method: auth_method,
        redirect_uris: request.redirect_uris.clone(),
        grant_types,
        response_types: response_types.clone(),
    };

    let response = RegistrationResponse {
        client_id,
        client_secret,
        token_endpoint_auth_method: auth_method_label(auth_method),
        redirect_uris: request.redirect_uris,
        grant_types: client.grant_types.iter().map(|g| grant_type_label(*g)).collect(),
        response_types,
    };

    Ok((client, serde_json::to_string(&response).map_err(|e| AuthError::InvalidRequest(e.to_string()))?))
}

/// Loopback (`http://127.0.0.1`/`http://localhost`) may use plain `http`;
/// every other scheme must be `https` or a custom (non-`http`) scheme, and
/// none may carry a fragment.
fn validate_redirect_uri(uri: &str) -> AuthResult<()> {
    let parsed = Url::parse(uri).map_err(|_| AuthError::InvalidRequest(format!("invalid redirect_uri: {uri}")))?;
    if parsed.fragment().is_some() {
        return Err(AuthError::InvalidRequest(format!("redirect_uri must not carry a fragment: {uri}")));
    }
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let is_loopback = matches!(parsed.host_str(), Some("localhost" | "127.0.0.1" | "::1"));
            if is_loopback {
                Ok(())
            } else {
                Err(AuthError::InvalidRequest(format!(
                    "http redirect_uri must be loopback: {uri}"
                )))
            }
        }
        _ => Ok(()),
    }
}

fn parse_grant_type(raw: &str) -> AuthResult<GrantType> {
    match raw {
        "authorization_code" => Ok(GrantType::AuthorizationCode),
        "refresh_token" => Ok(GrantType::RefreshToken),
        "client_credentials" => Ok(GrantType::ClientCredentials),
        other => Err(AuthError::InvalidRequest(format!("unsupported grant_type: {other}"))),
    }
}

fn grant_type_label(grant: GrantType) -> &'static str {
    match grant {
        GrantType::AuthorizationCode => "authorization_code",
        GrantType::RefreshToken => "refresh_token",
        GrantType::ClientCredentials => "client_credentials",
    }
}

fn auth_method_label(method: TokenEndpointAuthMethod) -> &'static str {
    match method {
        TokenEndpointAuthMethod::None => "none",
        TokenEndpointAuthMethod::ClientSecretPost => "client_secret_post",
        TokenEndpointAuthMethod::ClientSecretBasic => "client_secret_basic",
    }
}

fn random_token(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    (0..len).map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_redirect_uris() {
        let req = RegistrationRequest {
            redirect_uris: vec![],
            token_endpoint_auth_method: None,
            grant_types: None,
            response_types: None,
            client_name: None,
        };
        assert!(validate_and_build(req).is_err());
    }

    #[test]
    fn rejects_non_loopback_http_redirect_uri() {
        let req = RegistrationRequest {
            redirect_uris: vec!["http://example.com/callback".to_string()],
            token_endpoint_auth_method: None,
            grant_types: None,
            response_types: None,
            client_name: None,
        };
        assert!(validate_and_build(req).is_err());
    }

    #[test]
    fn accepts_loopback_http_and_defaults_everything() {
        let req = RegistrationRequest {
            redirect_uris: vec!["http://127.0.0.1:8080/callback".to_string()],
            token_endpoint_auth_method: None,
            grant_types: None,
            response_types: None,
            client_name: Some("test client".to_string()),
        };
        let (client, _) = validate_and_build(req).expect("should register");
        assert_eq!(client.token_endpoint_auth_method, TokenEndpointAuthMethod::None);
        assert!(client.client_secret.is_none());
        assert_eq!(client.grant_types, vec![GrantType::AuthorizationCode]);
        assert!(client.client_id.starts_with("mcp_client_"));
    }

    #[test]
    fn issues_a_secret_when_auth_method_requires_one() {
        let req = RegistrationRequest {
            redirect_uris: vec!["https://example.com/callback".to_string()],
            token_endpoint_auth_method: Some("client_secret_basic".to_string()),
            grant_types: None,
            response_types: None,
            client_name: None,
        };
        let (client, _) = validate_and_build(req).expect("should register");
        assert!(client.client_secret.is_some());
    }

    #[test]
    fn rejects_redirect_uri_with_fragment() {
        let req = RegistrationRequest {
            redirect_uris: vec!["https://example.com/callback#frag".to_string()],
            token_endpoint_auth_method: None,
            grant_types: None,
            response_types: None,
            client_name: None,
        };
        assert!(validate_and_build(req).is_err());
    }
}

//! The OAuth 2.1 authorization-server surface (§4.7): metadata discovery,
//! dynamic client registration, the authorize/callback/token dance, and
//! introspection/revocation/userinfo.
//!
//! Admin session authentication itself is an external collaborator (the
//! browser-facing login UI is explicitly out of scope here) — `authorize`
//! and `callback` depend on it only through [`AdminSessionValidator`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration as ChronoDuration, Utc};
use metamcp_store::{AccessToken, AuthorizationCode, CodeChallengeMethod, OAuthStore, TokenEndpointAuthMethod};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dcr::{self, RegistrationRequest};
use crate::error::{AuthError, AuthResult};
use crate::gate::derive_base_url;
use crate::pkce;

const CODE_TTL_SECONDS: i64 = 300;
const TOKEN_TTL_SECONDS: i64 = 3600;
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Resolves the logged-in admin's user id from an inbound request, or
/// `None` if there is no valid session. Implemented outside this crate.
pub trait AdminSessionValidator: Send + Sync {
    fn validate_session(&self, headers: &HeaderMap) -> Option<String>;
}

#[derive(Clone)]
pub struct AuthServerState {
    pub oauth: Arc<dyn OAuthStore>,
    pub session_validator: Arc<dyn AdminSessionValidator>,
    pub base_url: Option<String>,
    /// Identifier of the protected resource, advertised in RFC 9728 metadata.
    pub resource: String,
    /// Path the browser is sent to when no valid admin session exists.
    pub login_ui_path: String,
}

pub fn router(state: AuthServerState) -> Router {
    Router::new()
        .route("/.well-known/oauth-protected-resource", get(protected_resource_metadata))
        .route("/.well-known/oauth-authorization-server", get(authorization_server_metadata))
        .route("/oauth/register", post(register))
        .route("/oauth/authorize", get(authorize))
        .route("/oauth/callback", get(callback))
        .route("/oauth/token", post(token))
        .route("/oauth/introspect", post(introspect))
        .route("/oauth/revoke", post(revoke))
        .route("/oauth/userinfo", get(userinfo))
        .with_state(state)
}

/// Spawns the 5-minute expired-code/token sweep. Caller holds the handle.
pub fn spawn_expiry_sweep(oauth: Arc<dyn OAuthStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match oauth.sweep_expired().await {
                Ok(removed) if removed > 0 => tracing::debug!(removed, "swept expired oauth rows"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "oauth expiry sweep failed"),
            }
        }
    })
}

fn base_url(state: &AuthServerState, headers: &HeaderMap) -> String {
    derive_base_url(&state.base_url, headers, "https", "localhost")
}

async fn protected_resource_metadata(State(state): State<AuthServerState>, headers: HeaderMap) -> Json<Value> {
    let base = base_url(&state, &headers);
    Json(json!({
        "resource": state.resource,
        "authorization_servers": [base],
        "scopes_supported": ["admin"],
        "introspection_endpoint": format!("{base}/oauth/introspect"),
        "revocation_endpoint": format!("{base}/oauth/revoke"),
    }))
}

async fn authorization_server_metadata(State(state): State<AuthServerState>, headers: HeaderMap) -> Json<Value> {
    let base = base_url(&state, &headers);
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/oauth/authorize"),
        "token_endpoint": format!("{base}/oauth/token"),
        "registration_endpoint": format!("{base}/oauth/register"),
        "introspection_endpoint": format!("{base}/oauth/introspect"),
        "revocation_endpoint": format!("{base}/oauth/revoke"),
        "userinfo_endpoint": format!("{base}/oauth/userinfo"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
    }))
}

async fn register(State(state): State<AuthServerState>, Json(request): Json<RegistrationRequest>) -> AuthResult<Response> {
    let (client, _) = dcr::validate_and_build(request)?;
    let stored = state.oauth.upsert_client(client).await?;
    let body = json!({
        "client_id": stored.client_id,
        "client_secret": stored.client_secret,
        "redirect_uris": stored.redirect_uris,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
struct AuthorizeParams {
    response_type: String,
    client_id: String,
    redirect_uri: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    state: Option<String>,
    code_challenge: String,
    code_challenge_method: String,
}

async fn authorize(
    State(state): State<AuthServerState>,
    Query(params): Query<AuthorizeParams>,
    headers: HeaderMap,
) -> AuthResult<Response> {
    if params.response_type != "code" {
        return Err(AuthError::InvalidRequest("response_type must be code".into()));
    }
    let client = state
        .oauth
        .find_client(&params.client_id)
        .await
        .map_err(|_| AuthError::InvalidClient("unknown client_id".into()))?;
    if !client.redirect_uris.contains(&params.redirect_uri) {
        return Err(AuthError::InvalidRequest("redirect_uri not registered for client".into()));
    }
    let challenge_method = parse_challenge_method(&params.code_challenge_method)?;

    if let Some(user_id) = state.session_validator.validate_session(&headers) {
        let code = mint_authorization_code(&params, user_id, challenge_method);
        state.oauth.insert_code(code.clone()).await?;
        return Ok(redirect_with_code(&params.redirect_uri, &code.code, params.state.as_deref()));
    }

    let carried = json!({
        "response_type": params.response_type,
        "client_id": params.client_id,
        "redirect_uri": params.redirect_uri,
        "scope": params.scope,
        "state": params.state,
        "code_challenge": params.code_challenge,
        "code_challenge_method": params.code_challenge_method,
    });
    let encoded = URL_SAFE_NO_PAD.encode(carried.to_string());
    Ok(Redirect::to(&format!("{}?callbackUrl={}", state.login_ui_path, encoded)).into_response())
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(rename = "callbackUrl")]
    callback_url: String,
}

async fn callback(State(state): State<AuthServerState>, Query(params): Query<CallbackParams>, headers: HeaderMap) -> AuthResult<Response> {
    let user_id = state
        .session_validator
        .validate_session(&headers)
        .ok_or_else(|| AuthError::InvalidRequest("no active admin session".into()))?;

    let decoded = URL_SAFE_NO_PAD
        .decode(&params.callback_url)
        .map_err(|_| AuthError::InvalidRequest("malformed callbackUrl".into()))?;
    let carried: Value =
        serde_json::from_slice(&decoded).map_err(|_| AuthError::InvalidRequest("malformed callbackUrl".into()))?;

    let client_id = carried["client_id"].as_str().unwrap_or_default().to_string();
    let redirect_uri = carried["redirect_uri"].as_str().unwrap_or_default().to_string();
    let scope = carried["scope"].as_str().map(str::to_string);
    let state_param = carried["state"].as_str().map(str::to_string);
    let code_challenge = carried["code_challenge"].as_str().unwrap_or_default().to_string();
    let code_challenge_method = parse_challenge_method(carried["code_challenge_method"].as_str().unwrap_or_default())?;

    let code = AuthorizationCode {
        code: format!("mcp_code_{}", random_token(32)),
        client_id,
        redirect_uri: redirect_uri.clone(),
        scope: scope.unwrap_or_else(|| "admin".to_string()),
        user_id,
        code_challenge,
        code_challenge_method,
        expires_at: Utc::now() + ChronoDuration::seconds(CODE_TTL_SECONDS),
    };
    state.oauth.insert_code(code.clone()).await?;

    // Own-callback loop guard: never redirect back into ourselves.
    let own_callback = redirect_uri.ends_with("/oauth/callback");
    if own_callback {
        return Ok(Html("<html><body>Authorization complete. You may close this window.</body></html>").into_response());
    }
    Ok(redirect_with_code(&redirect_uri, &code.code, state_param.as_deref()))
}

#[derive(Debug, Default, Deserialize)]
struct TokenRequest {
    grant_type: Option<String>,
    code: Option<String>,
    redirect_uri: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    code_verifier: Option<String>,
}

async fn token(State(state): State<AuthServerState>, headers: HeaderMap, body: axum::body::Bytes) -> AuthResult<Json<Value>> {
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or_default();
    let request: TokenRequest = if content_type.contains("application/json") {
        serde_json::from_slice(&body).map_err(|e| AuthError::InvalidRequest(e.to_string()))?
    } else {
        parse_form_body(&body)
    };

    if request.grant_type.as_deref() != Some("authorization_code") {
        return Err(AuthError::InvalidGrant("only authorization_code is supported".into()));
    }
    let code_value = request.code.ok_or_else(|| AuthError::InvalidRequest("code is required".into()))?;
    let redirect_uri = request.redirect_uri.ok_or_else(|| AuthError::InvalidRequest("redirect_uri is required".into()))?;

    let code = state.oauth.take_code(&code_value).await.map_err(|_| AuthError::InvalidGrant("unknown or expired code".into()))?;
    if code.expires_at <= Utc::now() {
        return Err(AuthError::InvalidGrant("code has expired".into()));
    }
    if code.redirect_uri != redirect_uri {
        return Err(AuthError::InvalidGrant("redirect_uri mismatch".into()));
    }

    let client_id = request.client_id.or_else(|| basic_auth_client_id(&headers)).ok_or_else(|| {
        AuthError::InvalidClient("client_id is required".into())
    })?;
    if client_id != code.client_id {
        return Err(AuthError::InvalidGrant("client_id mismatch".into()));
    }
    let client = state.oauth.find_client(&client_id).await.map_err(|_| AuthError::InvalidClient("unknown client".into()))?;

    authenticate_client(&client, &headers, request.client_secret.as_deref())?;

    let verifier = request.code_verifier.ok_or_else(|| AuthError::InvalidGrant("code_verifier is required".into()))?;
    if !pkce::verify(code.code_challenge_method, &verifier, &code.code_challenge) {
        return Err(AuthError::InvalidGrant("code_verifier does not match".into()));
    }

    let now = Utc::now();
    let access = AccessToken {
        token: format!("mcp_token_{}_{}", now.timestamp_millis(), random_token(9)),
        client_id: client.client_id,
        user_id: code.user_id,
        scope: code.scope.clone(),
        expires_at: now + ChronoDuration::seconds(TOKEN_TTL_SECONDS),
        issued_at: now,
    };
    state.oauth.insert_token(access.clone()).await?;

    Ok(Json(json!({
        "access_token": access.token,
        "token_type": "Bearer",
        "expires_in": TOKEN_TTL_SECONDS,
        "scope": access.scope,
    })))
}

fn authenticate_client(client: &metamcp_store::OAuthClient, headers: &HeaderMap, body_secret: Option<&str>) -> AuthResult<()> {
    match client.token_endpoint_auth_method {
        TokenEndpointAuthMethod::None => Ok(()),
        TokenEndpointAuthMethod::ClientSecretPost => {
            let provided = body_secret.ok_or_else(|| AuthError::InvalidClient("client_secret is required".into()))?;
            if client.client_secret.as_deref() == Some(provided) {
                Ok(())
            } else {
                Err(AuthError::UnauthorizedClient)
            }
        }
        TokenEndpointAuthMethod::ClientSecretBasic => {
            let (_, secret) = decode_basic_auth(headers).ok_or_else(|| AuthError::InvalidClient("Basic auth is required".into()))?;
            if client.client_secret.as_deref() == Some(secret.as_str()) {
                Ok(())
            } else {
                Err(AuthError::UnauthorizedClient)
            }
        }
    }
}

fn basic_auth_client_id(headers: &HeaderMap) -> Option<String> {
    decode_basic_auth(headers).map(|(id, _)| id)
}

fn decode_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (id, secret) = text.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

#[derive(Debug, Deserialize)]
struct IntrospectRequest {
    token: Option<String>,
}

async fn introspect(State(state): State<AuthServerState>, Json(request): Json<IntrospectRequest>) -> Json<Value> {
    let Some(token) = request.token else {
        return Json(json!({ "active": false }));
    };
    if !token.starts_with("mcp_token_") {
        return Json(json!({ "active": false }));
    }
    let Ok(access) = state.oauth.find_token(&token).await else {
        return Json(json!({ "active": false }));
    };
    if access.expires_at <= Utc::now() {
        let _ = state.oauth.delete_token(&token).await;
        return Json(json!({ "active": false }));
    }
    Json(json!({
        "active": true,
        "scope": access.scope,
        "client_id": access.client_id,
        "token_type": "Bearer",
        "exp": access.expires_at.timestamp(),
        "iat": access.issued_at.timestamp(),
        "sub": access.user_id,
    }))
}

#[derive(Debug, Deserialize)]
struct RevokeRequest {
    token: Option<String>,
}

async fn revoke(State(state): State<AuthServerState>, Json(request): Json<RevokeRequest>) -> StatusCode {
    if let Some(token) = request.token {
        let _ = state.oauth.delete_token(&token).await;
    }
    StatusCode::OK
}

async fn userinfo(State(state): State<AuthServerState>, headers: HeaderMap) -> AuthResult<Json<Value>> {
    let auth = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).ok_or(AuthError::InvalidToken)?;
    let token = auth.strip_prefix("Bearer ").ok_or(AuthError::InvalidToken)?;
    if !token.starts_with("mcp_token_") {
        return Err(AuthError::InvalidToken);
    }
    let access = state.oauth.find_token(token).await.map_err(|_| AuthError::InvalidToken)?;
    if access.expires_at <= Utc::now() {
        return Err(AuthError::InvalidToken);
    }
    Ok(Json(json!({ "sub": access.user_id, "scope": access.scope })))
}

fn parse_challenge_method(raw: &str) -> AuthResult<CodeChallengeMethod> {
    match raw {
        "S256" => Ok(CodeChallengeMethod::S256),
        "plain" => Ok(CodeChallengeMethod::Plain),
        other => Err(AuthError::InvalidRequest(format!("unsupported code_challenge_method: {other}"))),
    }
}

fn mint_authorization_code(params: &AuthorizeParams, user_id: String, method: CodeChallengeMethod) -> AuthorizationCode {
    AuthorizationCode {
        code: format!("mcp_code_{}", random_token(32)),
        client_id: params.client_id.clone(),
        redirect_uri: params.redirect_uri.clone(),
        scope: params.scope.clone().unwrap_or_else(|| "admin".to_string()),
        user_id,
        code_challenge: params.code_challenge.clone(),
        code_challenge_method: method,
        expires_at: Utc::now() + ChronoDuration::seconds(CODE_TTL_SECONDS),
    }
}

fn redirect_with_code(redirect_uri: &str, code: &str, state: Option<&str>) -> Response {
    let mut url = format!("{redirect_uri}?code={code}");
    if let Some(state) = state {
        let encoded: String = url::form_urlencoded::byte_serialize(state.as_bytes()).collect();
        url.push_str(&format!("&state={encoded}"));
    }
    Redirect::to(&url).into_response()
}

fn random_token(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    (0..len).map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char).collect()
}

fn parse_form_body(body: &[u8]) -> TokenRequest {
    let fields: HashMap<String, String> = url::form_urlencoded::parse(body).into_owned().collect();
    TokenRequest {
        grant_type: fields.get("grant_type").cloned(),
        code: fields.get("code").cloned(),
        redirect_uri: fields.get("redirect_uri").cloned(),
        client_id: fields.get("client_id").cloned(),
        client_secret: fields.get("client_secret").cloned(),
        code_verifier: fields.get("code_verifier").cloned(),
    }
}

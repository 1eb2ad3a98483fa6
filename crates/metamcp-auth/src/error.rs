use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// OAuth/auth-gate error taxonomy (§7). Each variant already knows its
/// HTTP status and `WWW-Authenticate` framing, since that framing is the
/// part of this spec most likely to be gotten subtly wrong.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error("invalid_client: {0}")]
    InvalidClient(String),

    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    #[error("unauthorized_client")]
    UnauthorizedClient,

    #[error("invalid_api_key")]
    InvalidApiKey,

    /// §4.8's api-key-only, no-token case: 401 `invalid_request` with *no*
    /// `WWW-Authenticate` header — kept distinct from [`Self::InvalidRequest`]
    /// (400, used by registration/token validation) since the two need
    /// different statuses for the same error code.
    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid_token")]
    InvalidToken,

    /// Gate failure where both API-key and OAuth validation failed, or
    /// where a credential was presented against the wrong scheme (§4.8
    /// deliberately answers these with 429, not 401/403, so a misbehaving
    /// inspector client backs off instead of retrying the same challenge).
    #[error("invalid_credentials")]
    InvalidCredentials,

    #[error("forbidden")]
    Forbidden,

    #[error("rate limited")]
    RateLimited,

    /// The "present a Bearer `WWW-Authenticate` challenge" case: a 401
    /// carrying the exact header value the gate computed.
    #[error("unauthorized")]
    OAuthChallenge(String),

    #[error("store error: {0}")]
    Store(#[from] metamcp_store::StoreError),
}

impl AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::InvalidApiKey => "invalid_api_key",
            Self::MissingApiKey => "invalid_request",
            Self::InvalidToken => "invalid_token",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::OAuthChallenge(_) => "invalid_request",
            Self::Store(_) => "server_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidClient(_) | Self::InvalidGrant(_) => StatusCode::BAD_REQUEST,
            Self::UnauthorizedClient | Self::InvalidApiKey | Self::MissingApiKey | Self::OAuthChallenge(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidToken | Self::InvalidCredentials | Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({ "error": self.error_code(), "error_description": self.to_string() });
        let mut response = (status, Json(body)).into_response();
        if let Self::OAuthChallenge(header_value) = &self {
            if let Ok(value) = header_value.parse() {
                response.headers_mut().insert(axum::http::header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

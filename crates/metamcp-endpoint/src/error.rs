use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type EndpointResult<T> = std::result::Result<T, EndpointError>;

#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("rate limited")]
    RateLimited,

    #[error(transparent)]
    Auth(#[from] metamcp_auth::AuthError),

    #[error(transparent)]
    Proxy(#[from] metamcp_proxy::ProxyError),

    #[error(transparent)]
    Pool(#[from] metamcp_pool::PoolError),

    #[error(transparent)]
    Store(#[from] metamcp_store::StoreError),
}

impl IntoResponse for EndpointError {
    fn into_response(self) -> Response {
        match self {
            Self::Auth(e) => e.into_response(),
            Self::NotFound(detail) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found", "error_description": detail }))).into_response()
            }
            Self::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "bad_request", "error_description": detail })),
            )
                .into_response(),
            Self::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": "rate_limited" }))).into_response()
            }
            Self::Proxy(e) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "upstream_error", "error_description": e.to_string() })),
            )
                .into_response(),
            Self::Pool(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "pool_error", "error_description": e.to_string() })),
            )
                .into_response(),
            Self::Store(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "store_error", "error_description": e.to_string() })),
            )
                .into_response(),
        }
    }
}

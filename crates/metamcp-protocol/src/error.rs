//! A single, centrally defined error shape.
//!
//! Every subsystem converts its own error enum into this one at the point it
//! crosses into a JSON-RPC response or an HTTP status code, so the
//! "ad-hoc JSON error literal" pattern never creeps back in (see the source
//! notes on centralizing error shapes).

use serde::Serialize;
use std::fmt;

use crate::jsonrpc::JsonRpcError;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used to pick an HTTP status / JSON-RPC code and to
/// decide retry/promotion behavior upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Missing/malformed configuration, fatal at startup.
    Configuration,
    /// Spawn failed, connection refused, handshake timed out.
    UpstreamConnection,
    /// Per-request timeout or upstream-reported JSON-RPC error.
    UpstreamRequest,
    /// Upstream process crashed mid-session.
    UpstreamCrash,
    /// Requested tool/prompt/resource name does not resolve to any upstream.
    NotFound,
    /// Authentication failed (bad/missing credential).
    Unauthorized,
    /// Authenticated but not authorized for this resource (ACL deny).
    Forbidden,
    /// Rate limit bucket exhausted.
    RateLimited,
    /// Malformed request parameters (OAuth, tool call, …).
    InvalidRequest,
    /// Operation was cancelled by the caller.
    Cancelled,
    /// Anything else.
    Internal,
}

impl ErrorCode {
    /// Standard JSON-RPC 2.0 error code, or an MCP-reserved extension code.
    pub const fn json_rpc_code(self) -> i32 {
        match self {
            Self::InvalidRequest => -32600,
            Self::NotFound => -32601,
            Self::Configuration | Self::Internal => -32603,
            Self::UpstreamConnection | Self::UpstreamCrash => -32001,
            Self::UpstreamRequest => -32002,
            Self::Unauthorized => -32003,
            Self::Forbidden => -32004,
            Self::RateLimited => -32005,
            Self::Cancelled => -32006,
        }
    }

    /// HTTP status this error maps to when surfaced over the endpoint HTTP
    /// surface rather than as a JSON-RPC response.
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::RateLimited => 429,
            Self::InvalidRequest | Self::NotFound => 400,
            Self::Configuration | Self::Internal => 500,
            Self::UpstreamConnection | Self::UpstreamRequest | Self::UpstreamCrash => 502,
            Self::Cancelled => 499,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono_like::Timestamp>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp: Some(chrono_like::Timestamp::now()),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Configuration, message)
    }

    pub fn upstream_connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamConnection, message)
    }

    pub fn upstream_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Build the JSON-RPC error object a client should receive for this error.
    pub fn to_json_rpc(&self) -> JsonRpcError {
        let mut err = JsonRpcError::new(self.code.json_rpc_code(), self.message.clone());
        err.data = Some(serde_json::json!({ "kind": self.code }));
        err
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

/// A minimal wall-clock timestamp wrapper, kept dependency-free at this
/// layer (higher layers that already pull in `chrono` convert as needed).
mod chrono_like {
    use serde::Serialize;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[derive(Debug, Clone, Copy, Serialize)]
    pub struct Timestamp {
        epoch_ms: u128,
    }

    impl Timestamp {
        pub fn now() -> Self {
            let epoch_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            Self { epoch_ms }
        }
    }
}

use metamcp_transport::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("upstream returned error {code}: {message}")]
    Upstream { code: i32, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("client not connected")]
    NotConnected,

    #[error("initialize handshake failed: {0}")]
    HandshakeFailed(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

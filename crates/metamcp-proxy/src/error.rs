use metamcp_client::ClientError;
use metamcp_store::StoreError;
use thiserror::Error;

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    #[error("unknown tool/prompt/resource: {0}")]
    NotFound(String),

    #[error("namespace lookup failed: {0}")]
    Namespace(#[from] StoreError),

    #[error("upstream call failed: {0}")]
    Upstream(#[from] ClientError),

    #[error("upstream not connected")]
    NotConnected,
}

impl ProxyError {
    /// JSON-RPC error code this maps to when surfaced to the external
    /// client, per §7's error taxonomy.
    #[must_use]
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => -32601,
            Self::NotConnected => -32001,
            Self::Namespace(_) | Self::Upstream(_) => -32000,
        }
    }
}

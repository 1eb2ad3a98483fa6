use thiserror::Error;

pub type PoolResult<T> = std::result::Result<T, PoolError>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("upstream server is in ERROR status")]
    ServerInError,

    #[error("no cached parameters for this server")]
    MissingParams,
}

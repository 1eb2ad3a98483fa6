//! Two-tier idle/active connection cache for upstream MCP servers (§4.4),
//! backed by a process-wide crash-promotion tracker (§4.3).

pub mod connection;
pub mod error;
pub mod error_tracker;
pub mod pool;

pub use error::{PoolError, PoolResult};
pub use error_tracker::ErrorTracker;
pub use pool::{ConnectionParams, ServerPool};

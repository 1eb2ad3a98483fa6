//! The aggregating MCP proxy (§4.5) and the single-upstream proxy bridge
//! (§4.6).

pub mod aggregating_proxy;
pub mod bridge;
pub mod error;
pub mod options;

pub use aggregating_proxy::{unified_server_name, AggregatingProxy, NotificationSink};
pub use bridge::ProxyBridge;
pub use error::{ProxyError, ProxyResult};

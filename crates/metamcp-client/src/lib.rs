//! MCP JSON-RPC client bound to one transport. Performs the initialize
//! handshake and exposes typed request methods; see [`client::UpstreamClient`].

pub mod client;
pub mod error;
pub mod options;

pub use client::{CrashHandler, FallbackHandler, NotificationHandler, UpstreamClient};
pub use error::{ClientError, Result};
pub use options::RequestOptions;

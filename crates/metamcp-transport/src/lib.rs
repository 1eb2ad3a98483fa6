//! Transport adapters connecting to a single upstream MCP server.
//!
//! Three concrete variants share one contract (see [`core::Transport`]):
//! [`stdio::StdioTransport`] spawns a child process and frames JSON-RPC over
//! its stdin/stdout; [`sse::SseTransport`] speaks Server-Sent-Events plus a
//! companion POST endpoint; [`streamable_http::StreamableHttpTransport`]
//! speaks the bidirectional GET/POST/DELETE variant keyed by
//! `mcp-session-id`.

pub mod core;
pub mod cooldown;
pub mod sse;
pub mod stdio;
pub mod streamable_http;

pub use core::{
    Transport, TransportError, TransportEvent, TransportHandle, TransportResult, TransportState,
};
pub use cooldown::{CooldownKey, CooldownMap};
pub use sse::{SseConfig, SseTransport};
pub use stdio::{StdioConfig, StdioTransport};
pub use streamable_http::{StreamableHttpConfig, StreamableHttpTransport};

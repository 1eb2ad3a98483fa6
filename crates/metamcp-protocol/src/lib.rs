//! Wire types shared by every MetaMCP component: the JSON-RPC 2.0 envelope,
//! the handful of MCP result/descriptor types the aggregator reads or
//! rewrites, and the error codes used to translate failures into JSON-RPC
//! error responses.
//!
//! This crate does not attempt to model the full MCP specification (sampling,
//! elicitation, roots, …) — MetaMCP treats everything beyond `tools`,
//! `prompts`, and `resources` as an opaque `serde_json::Value` and forwards it
//! unchanged.

pub mod error;
pub mod jsonrpc;
pub mod types;

pub use error::{Error, ErrorCode, Result};
pub use jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, MessageId};
pub use types::{
    Implementation, InitializeResult, Prompt, PromptArgument, Resource, ResourceTemplate,
    ServerCapabilities, Tool,
};

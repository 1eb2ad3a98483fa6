//! JSON-RPC 2.0 envelope types.
//!
//! MetaMCP never needs to parse the *body* of MCP requests and results beyond
//! `tools/list`, `tools/call`, `prompts/*`, and `resources/*` — everything
//! else is forwarded as an opaque [`serde_json::Value`]. Keeping the envelope
//! separate from the payload keeps the aggregator transport-agnostic.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// JSON-RPC request/response identifier. MCP allows both strings and numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// String identifier
    String(String),
    /// Numeric identifier
    Number(i64),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// The literal `"2.0"` JSON-RPC version marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == "2.0" {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid jsonrpc version: expected \"2.0\", got {version:?}"
            )))
        }
    }
}

/// A JSON-RPC request, either originated by an external client or forwarded
/// to an upstream server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: MessageId,
}

impl JsonRpcRequest {
    pub fn new(id: MessageId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC notification (no `id`, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// JSON-RPC `-32001`, used by the proxy bridge for an undeliverable request.
    pub fn not_delivered(detail: impl Into<String>) -> Self {
        Self::new(-32001, detail.into())
    }
}

/// Result or error payload of a response, mutually exclusive by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    Success { result: Value },
    Error { error: JsonRpcError },
}

/// A JSON-RPC response. `id` is `None` only for responses to unparseable
/// requests (parse errors), per the JSON-RPC 2.0 specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: JsonRpcVersion,
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
    pub id: Option<MessageId>,
}

impl JsonRpcResponse {
    pub fn success(id: MessageId, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Success { result },
            id: Some(id),
        }
    }

    pub fn error(id: Option<MessageId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error { error },
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, JsonRpcResponsePayload::Error { .. })
    }
}

/// Any one of the three JSON-RPC message shapes, as received off a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Parse a single newline-delimited JSON-RPC frame.
    pub fn from_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let req = JsonRpcRequest::new(
            MessageId::Number(1),
            "tools/list",
            Some(serde_json::json!({})),
        );
        let line = serde_json::to_string(&req).unwrap();
        let parsed: JsonRpcMessage = JsonRpcMessage::from_str(&line).unwrap();
        match parsed {
            JsonRpcMessage::Request(r) => assert_eq!(r.method, "tools/list"),
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn rejects_bad_version() {
        let bad = r#"{"jsonrpc":"1.0","method":"x","id":1}"#;
        assert!(JsonRpcMessage::from_str(bad).is_err());
    }

    #[test]
    fn response_error_has_no_result_field() {
        let resp = JsonRpcResponse::error(Some(MessageId::Number(1)), JsonRpcError::not_delivered("gone"));
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], -32001);
    }
}

//! Translates one inbound JSON-RPC request into the matching
//! [`AggregatingProxy`] call and back into a JSON-RPC response. The
//! envelope-level concerns (transport framing, session lookup) live in
//! `session.rs`; this module only knows MCP method names.

use metamcp_protocol::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use metamcp_protocol::types::{Implementation, InitializeResult, ServerCapabilities};
use metamcp_proxy::{AggregatingProxy, ProxyError, ProxyResult};
use serde_json::{json, Value};

/// Must match the protocol version the aggregator negotiates with upstreams
/// during their own `initialize` handshake.
const PROTOCOL_VERSION: &str = "2025-06-18";

pub async fn dispatch(proxy: &AggregatingProxy, request: JsonRpcRequest) -> JsonRpcResponse {
    match route(proxy, &request.method, request.params).await {
        Ok(result) => JsonRpcResponse::success(request.id, result),
        Err(e) => JsonRpcResponse::error(Some(request.id), JsonRpcError::new(e.jsonrpc_code(), e.to_string())),
    }
}

async fn route(proxy: &AggregatingProxy, method: &str, params: Option<Value>) -> ProxyResult<Value> {
    match method {
        "initialize" => Ok(serde_json::to_value(initialize_result(proxy)).unwrap_or(Value::Null)),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": proxy.list_tools().await? })),
        "tools/call" => {
            let params = params.ok_or_else(|| ProxyError::NotFound("tools/call missing params".into()))?;
            let name = required_str(&params, "name")?;
            proxy.call_tool(&name, params.get("arguments").cloned()).await
        }
        "prompts/list" => Ok(json!({ "prompts": proxy.list_prompts().await? })),
        "prompts/get" => {
            let params = params.ok_or_else(|| ProxyError::NotFound("prompts/get missing params".into()))?;
            let name = required_str(&params, "name")?;
            proxy.get_prompt(&name, params.get("arguments").cloned()).await
        }
        "resources/list" => Ok(json!({ "resources": proxy.list_resources().await? })),
        "resources/read" => {
            let params = params.ok_or_else(|| ProxyError::NotFound("resources/read missing params".into()))?;
            let uri = required_str(&params, "uri")?;
            proxy.read_resource(&uri).await
        }
        "resources/templates/list" => {
            Ok(json!({ "resourceTemplates": proxy.list_resource_templates().await? }))
        }
        other => Err(ProxyError::NotFound(other.to_string())),
    }
}

fn required_str(params: &Value, field: &str) -> ProxyResult<String> {
    params
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProxyError::NotFound(format!("missing required field: {field}")))
}

fn initialize_result(proxy: &AggregatingProxy) -> InitializeResult {
    InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            tools: Some(json!({})),
            prompts: Some(json!({})),
            resources: Some(json!({})),
        },
        server_info: Implementation { name: proxy.external_name().to_string(), version: Some(env!("CARGO_PKG_VERSION").to_string()) },
        instructions: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metamcp_pool::{ErrorTracker, ServerPool};
    use metamcp_protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponsePayload, MessageId};
    use metamcp_store::{InMemoryStore, Namespace};
    use uuid::Uuid;

    use super::*;

    fn proxy_over_empty_namespace() -> (Uuid, AggregatingProxy) {
        let store = Arc::new(InMemoryStore::new());
        let ns_uuid = Uuid::new_v4();
        store.insert_namespace(Namespace { uuid: ns_uuid, name: "empty".into(), servers: vec![] });

        let pool = ServerPool::new(Arc::new(ErrorTracker::new(store.clone())), false);
        let sink: metamcp_proxy::NotificationSink = Arc::new(|_, _| {});
        let proxy = AggregatingProxy::new(ns_uuid, "session-1".into(), pool, store.clone(), store, sink);
        (ns_uuid, proxy)
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(MessageId::Number(1), method, params)
    }

    fn payload(response: &JsonRpcResponse) -> &JsonRpcResponsePayload {
        &response.payload
    }

    #[tokio::test]
    async fn unknown_method_maps_to_method_not_found() {
        let (_, proxy) = proxy_over_empty_namespace();
        let response = dispatch(&proxy, request("notamethod", None)).await;
        assert!(response.is_error());
        let JsonRpcResponsePayload::Error { error } = payload(&response) else { panic!("expected an error payload") };
        assert_eq!(error.code, -32601);
    }

    #[tokio::test]
    async fn initialize_reports_the_unified_server_name() {
        let (ns_uuid, proxy) = proxy_over_empty_namespace();
        let response = dispatch(&proxy, request("initialize", None)).await;
        assert!(!response.is_error());
        let JsonRpcResponsePayload::Success { result } = payload(&response) else { panic!("expected a success payload") };
        let result: InitializeResult = serde_json::from_value(result.clone()).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert_eq!(result.server_info.name, metamcp_proxy::unified_server_name(ns_uuid));
    }

    #[tokio::test]
    async fn ping_returns_an_empty_object() {
        let (_, proxy) = proxy_over_empty_namespace();
        let response = dispatch(&proxy, request("ping", None)).await;
        let JsonRpcResponsePayload::Success { result } = payload(&response) else { panic!("expected a success payload") };
        assert_eq!(*result, json!({}));
    }

    #[tokio::test]
    async fn tools_list_on_an_empty_namespace_is_empty_not_an_error() {
        let (_, proxy) = proxy_over_empty_namespace();
        let response = dispatch(&proxy, request("tools/list", None)).await;
        assert!(!response.is_error());
        let JsonRpcResponsePayload::Success { result } = payload(&response) else { panic!("expected a success payload") };
        assert_eq!(*result, json!({ "tools": [] }));
    }

    #[tokio::test]
    async fn tools_call_without_params_is_rejected_before_reaching_the_proxy() {
        let (_, proxy) = proxy_over_empty_namespace();
        let response = dispatch(&proxy, request("tools/call", None)).await;
        assert!(response.is_error());
    }

    #[tokio::test]
    async fn tools_call_without_a_name_field_is_rejected() {
        let (_, proxy) = proxy_over_empty_namespace();
        let response = dispatch(&proxy, request("tools/call", Some(json!({ "arguments": {} })))).await;
        assert!(response.is_error());
    }
}

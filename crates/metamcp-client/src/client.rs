//! MCP JSON-RPC client bound to one transport: the initialize handshake,
//! typed request methods, and a notification-handler registry with
//! fallback. Grounded on the request/response correlation pattern used
//! throughout the teacher's client operations modules, generalized to a
//! single flat client rather than a builder/manager split this spec has no
//! use for.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use metamcp_protocol::jsonrpc::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};
use metamcp_protocol::types::{Implementation, InitializeResult, Prompt, Resource, ResourceTemplate, Tool};
use metamcp_protocol::MessageId;
use metamcp_transport::{Transport, TransportError, TransportEvent};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{ClientError, Result};
use crate::options::RequestOptions;

pub type NotificationHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;
pub type FallbackHandler = Arc<dyn Fn(&str, Option<Value>) + Send + Sync>;
pub type CrashHandler = Arc<dyn Fn(Option<i32>, Option<i32>) + Send + Sync>;

const CLIENT_NAME: &str = "metamcp-upstream-client";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

struct Inflight {
    responder: oneshot::Sender<Value>,
    /// Notified whenever a progress notification for this request's
    /// progress token arrives.
    progress: Arc<Notify>,
}

pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: Arc<DashMap<String, Inflight>>,
    progress_tokens: Arc<DashMap<String, String>>, // progress_token -> request id
    /// Shared with the event pump task so handlers registered after
    /// `connect()` (the aggregator registers its notification sink only
    /// once a client is resolved, which is always after the pool already
    /// connected it) still take effect.
    notification_handlers: Arc<DashMap<String, NotificationHandler>>,
    fallback: Arc<RwLock<Option<FallbackHandler>>>,
    on_crash: Arc<RwLock<Option<CrashHandler>>>,
    server_info: RwLock<Option<InitializeResult>>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UpstreamClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            progress_tokens: Arc::new(DashMap::new()),
            notification_handlers: Arc::new(DashMap::new()),
            fallback: Arc::new(RwLock::new(None)),
            on_crash: Arc::new(RwLock::new(None)),
            server_info: RwLock::new(None),
            pump: Mutex::new(None),
        }
    }

    pub fn on_notification(&self, method: impl Into<String>, handler: NotificationHandler) {
        self.notification_handlers.insert(method.into(), handler);
    }

    pub fn set_fallback(&self, handler: FallbackHandler) {
        *self.fallback.write() = Some(handler);
    }

    pub fn set_crash_handler(&self, handler: CrashHandler) {
        *self.on_crash.write() = Some(handler);
    }

    #[must_use]
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.read().clone()
    }

    /// Start the transport and begin pumping inbound events. Must be called
    /// before `initialize` or any request method.
    pub async fn connect(&self) -> Result<()> {
        let handle = self.transport.start().await?;
        let pending = self.pending.clone();
        let progress_tokens = self.progress_tokens.clone();
        // Cloning the `Arc`s (not their contents) means handlers registered
        // after `connect()` returns — which is the normal call order, since
        // the pool connects a client before the proxy ever sees it — are
        // still visible to the pump below.
        let notification_handlers = self.notification_handlers.clone();
        let fallback = self.fallback.clone();
        let on_crash = self.on_crash.clone();

        let mut events = handle.events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Message(line) => {
                        dispatch_message(&line, &pending, &progress_tokens, &notification_handlers, &fallback);
                    }
                    TransportEvent::Log(line) => trace!(line = %line, "upstream stderr"),
                    TransportEvent::Closed => {
                        fail_all_pending(&pending, ClientError::NotConnected);
                        break;
                    }
                    TransportEvent::Crashed { exit_code, signal } => {
                        fail_all_pending(&pending, ClientError::Transport(TransportError::ConnectionLost("process crashed".into())));
                        if let Some(ref handler) = *on_crash.read() {
                            handler(exit_code, signal);
                        }
                        break;
                    }
                    TransportEvent::Error(e) => warn!(error = %e, "upstream transport error"),
                }
            }
            debug!("upstream client event pump ended");
        });

        Ok(())
    }

    /// Closes the underlying transport and fails every in-flight request.
    /// Idempotent, per the transport's own `close()` contract.
    pub async fn close(&self) -> Result<()> {
        fail_all_pending(&self.pending, ClientError::NotConnected);
        self.transport.close().await?;
        Ok(())
    }

    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = serde_json::json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": Implementation { name: CLIENT_NAME.to_string(), version: Some(CLIENT_VERSION.to_string()) },
        });
        let result = self.request("initialize", Some(params), RequestOptions::new()).await?;
        let initialize_result: InitializeResult = serde_json::from_value(result)?;
        *self.server_info.write() = Some(initialize_result.clone());

        let notification = JsonRpcNotification::new("notifications/initialized", None);
        self.transport
            .send(serde_json::to_string(&notification)?)
            .await?;

        Ok(initialize_result)
    }

    pub async fn list_tools(&self, options: RequestOptions) -> Result<Vec<Tool>> {
        let result = self.request("tools/list", None, options).await?;
        Ok(serde_json::from_value::<ToolsListResult>(result)?.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Option<Value>, options: RequestOptions) -> Result<Value> {
        let params = serde_json::json!({ "name": name, "arguments": arguments.unwrap_or(Value::Null) });
        self.request("tools/call", Some(params), options).await
    }

    pub async fn list_prompts(&self, options: RequestOptions) -> Result<Vec<Prompt>> {
        let result = self.request("prompts/list", None, options).await?;
        Ok(serde_json::from_value::<PromptsListResult>(result)?.prompts)
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>, options: RequestOptions) -> Result<Value> {
        let params = serde_json::json!({ "name": name, "arguments": arguments.unwrap_or(Value::Null) });
        self.request("prompts/get", Some(params), options).await
    }

    pub async fn list_resources(&self, options: RequestOptions) -> Result<Vec<Resource>> {
        let result = self.request("resources/list", None, options).await?;
        Ok(serde_json::from_value::<ResourcesListResult>(result)?.resources)
    }

    pub async fn read_resource(&self, uri: &str, options: RequestOptions) -> Result<Value> {
        let params = serde_json::json!({ "uri": uri });
        self.request("resources/read", Some(params), options).await
    }

    pub async fn list_resource_templates(&self, options: RequestOptions) -> Result<Vec<ResourceTemplate>> {
        let result = self.request("resources/templates/list", None, options).await?;
        Ok(serde_json::from_value::<ResourceTemplatesListResult>(result)?.resource_templates)
    }

    /// Issue one JSON-RPC request and wait for its matching response,
    /// honoring `timeout`/`maxTotalTimeout`/`resetTimeoutOnProgress`/`signal`
    /// exactly as specified.
    pub async fn request(&self, method: &str, params: Option<Value>, options: RequestOptions) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message_id = MessageId::Number(id as i64);
        let progress_token = format!("progress-{id}");

        let mut params = params.unwrap_or(Value::Object(serde_json::Map::new()));
        if let Value::Object(ref mut map) = params {
            map.insert(
                "_meta".to_string(),
                serde_json::json!({ "progressToken": progress_token }),
            );
        }

        let request = JsonRpcRequest::new(message_id.clone(), method, Some(params));
        let (tx, mut rx) = oneshot::channel::<Value>();
        let progress_notify = Arc::new(Notify::new());
        let key = message_id.to_string();
        self.pending.insert(
            key.clone(),
            Inflight { responder: tx, progress: progress_notify.clone() },
        );
        self.progress_tokens.insert(progress_token.clone(), key.clone());

        let send_result = self.transport.send(serde_json::to_string(&request)?).await;
        if let Err(e) = send_result {
            self.pending.remove(&key);
            self.progress_tokens.remove(&progress_token);
            return Err(e.into());
        }

        let result = self
            .wait_for_response(&mut rx, &progress_notify, &options)
            .await;

        self.pending.remove(&key);
        self.progress_tokens.remove(&progress_token);
        result
    }

    async fn wait_for_response(
        &self,
        rx: &mut oneshot::Receiver<Value>,
        progress: &Notify,
        options: &RequestOptions,
    ) -> Result<Value> {
        let start = tokio::time::Instant::now();
        let max_deadline = options.max_total_timeout.map(|d| start + d);
        let mut deadline = options.timeout.map(|d| start + d);

        loop {
            let sleep_until = match (deadline, max_deadline) {
                (Some(d), Some(m)) => Some(d.min(m)),
                (Some(d), None) => Some(d),
                (None, Some(m)) => Some(m),
                (None, None) => None,
            };

            tokio::select! {
                biased;

                _ = cancelled(options.signal.as_ref()) => {
                    return Err(ClientError::Cancelled);
                }
                result = &mut *rx => {
                    return result.map_err(|_| ClientError::NotConnected);
                }
                _ = progress.notified(), if options.reset_timeout_on_progress && options.timeout.is_some() => {
                    deadline = options.timeout.map(|d| tokio::time::Instant::now() + d);
                    continue;
                }
                () = sleep_opt(sleep_until) => {
                    return Err(ClientError::Timeout);
                }
            }
        }
    }
}

async fn cancelled(token: Option<&tokio_util::sync::CancellationToken>) {
    match token {
        Some(t) => t.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

fn dispatch_message(
    line: &str,
    pending: &DashMap<String, Inflight>,
    progress_tokens: &DashMap<String, String>,
    notification_handlers: &DashMap<String, NotificationHandler>,
    fallback: &RwLock<Option<FallbackHandler>>,
) {
    let Ok(message) = JsonRpcMessage::from_str(line) else {
        warn!(line = %line, "failed to parse message from upstream");
        return;
    };

    match message {
        JsonRpcMessage::Response(response) => {
            let Some(id) = response.id.as_ref().map(ToString::to_string) else { return };
            if let Some((_, inflight)) = pending.remove(&id) {
                let value = match response.payload {
                    metamcp_protocol::jsonrpc::JsonRpcResponsePayload::Success { result } => result,
                    metamcp_protocol::jsonrpc::JsonRpcResponsePayload::Error { error } => {
                        serde_json::json!({ "__upstream_error": { "code": error.code, "message": error.message } })
                    }
                };
                let _ = inflight.responder.send(value);
            }
        }
        JsonRpcMessage::Notification(notification) => {
            if notification.method == "notifications/progress" {
                if let Some(token) = notification
                    .params
                    .as_ref()
                    .and_then(|p| p.get("progressToken"))
                    .and_then(|t| t.as_str())
                {
                    if let Some(request_id) = progress_tokens.get(token) {
                        if let Some(inflight) = pending.get(request_id.value()) {
                            inflight.progress.notify_one();
                        }
                    }
                }
                // Progress tokens resolve the waiting request above, but a
                // registered handler (the aggregator re-emits this on its
                // own external channel) still needs to see the notification.
            }
            if let Some(handler) = notification_handlers.get(&notification.method) {
                handler(notification.params);
            } else if let Some(ref handler) = *fallback.read() {
                handler(&notification.method, notification.params);
            }
        }
        JsonRpcMessage::Request(_) => {
            // Server-to-client requests (sampling, elicitation) are not
            // modeled by this aggregator's upstream client.
        }
    }
}

fn fail_all_pending(pending: &DashMap<String, Inflight>, _err: ClientError) {
    pending.clear();
}

#[derive(serde::Deserialize)]
struct ToolsListResult {
    tools: Vec<Tool>,
}

#[derive(serde::Deserialize)]
struct PromptsListResult {
    prompts: Vec<Prompt>,
}

#[derive(serde::Deserialize)]
struct ResourcesListResult {
    resources: Vec<Resource>,
}

#[derive(serde::Deserialize)]
struct ResourceTemplatesListResult {
    #[serde(rename = "resourceTemplates")]
    resource_templates: Vec<ResourceTemplate>,
}

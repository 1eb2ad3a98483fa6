//! Per-session bookkeeping for the aggregated routes (§4.9): one
//! [`AggregatingProxy`] and one outbound channel per active session,
//! keyed by the session id the client presents (SSE's `sessionId` query
//! parameter, or streamable HTTP's `mcp-session-id` header).

use std::sync::Arc;

use dashmap::DashMap;
use metamcp_pool::ServerPool;
use metamcp_proxy::AggregatingProxy;
use metamcp_protocol::jsonrpc::JsonRpcNotification;
use metamcp_store::{NamespaceStore, UpstreamServerStore};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

pub struct SessionEntry {
    pub proxy: Arc<AggregatingProxy>,
    pub outbound: mpsc::Sender<String>,
    /// Taken exactly once by whichever route opens this session's
    /// server→client stream (the `GET /sse` call itself, or a later
    /// `GET /mcp` for streamable HTTP).
    receiver: Mutex<Option<mpsc::Receiver<String>>>,
}

impl SessionEntry {
    /// Takes the server→client receiver, if it hasn't already been taken.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<String>> {
        self.receiver.lock().take()
    }
}

/// Live sessions across every aggregated endpoint. Sessions are opaque
/// strings scoped process-wide; collisions across endpoints are not a
/// concern because the id itself is a fresh UUID minted per session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionEntry>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a new session's aggregator, wiring its
    /// notification sink to push serialized `JsonRpcNotification` lines
    /// onto a fresh outbound channel.
    pub fn open(
        &self,
        session_id: String,
        namespace_uuid: Uuid,
        pool: Arc<ServerPool>,
        namespace_store: Arc<dyn NamespaceStore>,
        server_store: Arc<dyn UpstreamServerStore>,
    ) -> Arc<SessionEntry> {
        let (outbound, receiver) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let sink_tx = outbound.clone();
        let notification_sink: metamcp_proxy::NotificationSink = Arc::new(move |method: String, params: Option<Value>| {
            let tx = sink_tx.clone();
            let notification = JsonRpcNotification::new(method, params);
            if let Ok(line) = serde_json::to_string(&notification) {
                let _ = tx.try_send(line);
            }
        });

        let proxy = Arc::new(AggregatingProxy::new(
            namespace_uuid,
            session_id.clone(),
            pool,
            namespace_store,
            server_store,
            notification_sink,
        ));
        let entry = Arc::new(SessionEntry { proxy, outbound, receiver: Mutex::new(Some(receiver)) });
        self.sessions.insert(session_id, entry.clone());
        entry
    }

    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.get(session_id).map(|e| e.clone())
    }

    /// Removes the session from the registry. Pool resource cleanup is the
    /// caller's responsibility (`ServerPool::cleanup_session`), since it
    /// must run even if this entry was never found (idempotent teardown).
    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use metamcp_pool::ErrorTracker;
    use metamcp_store::InMemoryStore;

    use super::*;

    fn registry_and_pool() -> (SessionRegistry, Arc<ServerPool>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let pool = ServerPool::new(Arc::new(ErrorTracker::new(store.clone())), false);
        (SessionRegistry::new(), pool, store)
    }

    #[test]
    fn open_registers_the_session_and_get_finds_it() {
        let (registry, pool, store) = registry_and_pool();
        let ns_uuid = Uuid::new_v4();

        registry.open("s1".into(), ns_uuid, pool, store.clone(), store);

        assert!(registry.get("s1").is_some());
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn remove_is_idempotent_on_an_unknown_session() {
        let (registry, _pool, _store) = registry_and_pool();
        registry.remove("never-opened");
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn take_receiver_hands_out_the_receiver_exactly_once() {
        let (registry, pool, store) = registry_and_pool();
        let entry = registry.open("s1".into(), Uuid::new_v4(), pool, store.clone(), store);

        assert!(entry.take_receiver().is_some());
        assert!(entry.take_receiver().is_none());
    }

    #[tokio::test]
    async fn notification_sink_pushes_a_serialized_notification_onto_the_outbound_channel() {
        let (registry, pool, store) = registry_and_pool();
        let entry = registry.open("s1".into(), Uuid::new_v4(), pool, store.clone(), store);
        let mut rx = entry.take_receiver().unwrap();

        entry
            .outbound
            .try_send(serde_json::to_string(&JsonRpcNotification::new("notifications/message", None)).unwrap())
            .unwrap();

        let line = rx.recv().await.expect("a line was pushed");
        assert!(line.contains("notifications/message"));
    }
}

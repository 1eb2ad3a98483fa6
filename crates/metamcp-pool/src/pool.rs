//! The two-tier idle/active connection cache (§4.4). The heart of
//! connection management: every shared map lives behind one lock that is
//! never held across an `.await` — bookkeeping steps take the lock,
//! mutate, and release it before any connect/close happens.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use metamcp_client::UpstreamClient;
use metamcp_store::{ServerKind, ServerParams};
use metamcp_transport::CooldownMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::connection::{build_transport, connect};
use crate::error::{PoolError, PoolResult};
use crate::error_tracker::ErrorTracker;

const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, PartialEq)]
pub struct ConnectionParams {
    pub kind: ServerKind,
    pub params: ServerParams,
}

#[derive(Default)]
struct PoolInner {
    idle: HashMap<Uuid, Arc<UpstreamClient>>,
    active: HashMap<String, HashMap<Uuid, Arc<UpstreamClient>>>,
    session_to_servers: HashMap<String, HashSet<Uuid>>,
    creating_idle: HashSet<Uuid>,
    params_cache: HashMap<Uuid, ConnectionParams>,
}

/// Holds a weak self-reference so background refill/crash-handling tasks
/// spawned from within pool methods can obtain a strong `Arc<ServerPool>`
/// without the caller having to thread one through every call.
pub struct ServerPool {
    error_tracker: Arc<ErrorTracker>,
    cooldown: Arc<CooldownMap>,
    docker_url_rewrite: bool,
    inner: Mutex<PoolInner>,
    self_ref: Weak<ServerPool>,
}

impl ServerPool {
    #[must_use]
    pub fn new(error_tracker: Arc<ErrorTracker>, docker_url_rewrite: bool) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            error_tracker,
            cooldown: Arc::new(CooldownMap::new()),
            docker_url_rewrite,
            inner: Mutex::new(PoolInner::default()),
            self_ref: self_ref.clone(),
        })
    }

    fn handle(&self) -> Arc<ServerPool> {
        self.self_ref.upgrade().expect("ServerPool dropped while still in use")
    }

    /// `getSession`: cache `params`; return the session's active connection
    /// for `uuid`, promoting an idle connection or opening a fresh one as
    /// needed. Returns `None` if the server is in ERROR status.
    pub async fn get_session(
        &self,
        session_id: &str,
        uuid: Uuid,
        params: ConnectionParams,
    ) -> PoolResult<Option<Arc<UpstreamClient>>> {
        self.inner.lock().params_cache.insert(uuid, params.clone());

        if let Some(existing) = self.inner.lock().active.get(session_id).and_then(|m| m.get(&uuid).cloned()) {
            return Ok(Some(existing));
        }

        if self.error_tracker.is_in_error(uuid).await {
            return Ok(None);
        }

        // Try to promote an idle connection to active.
        let promoted = self.inner.lock().idle.remove(&uuid);
        if let Some(conn) = promoted {
            self.install_active(session_id, uuid, conn.clone());
            self.spawn_idle_refill(uuid);
            return Ok(Some(conn));
        }

        // No idle connection available: open a fresh one directly as active.
        match self.create_connection(uuid, &params).await {
            Ok(conn) => {
                self.install_active(session_id, uuid, conn.clone());
                self.spawn_idle_refill(uuid);
                Ok(Some(conn))
            }
            Err(PoolError::ServerInError) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn install_active(&self, session_id: &str, uuid: Uuid, conn: Arc<UpstreamClient>) {
        let mut inner = self.inner.lock();
        inner.active.entry(session_id.to_string()).or_default().insert(uuid, conn);
        inner.session_to_servers.entry(session_id.to_string()).or_default().insert(uuid);
    }

    fn spawn_idle_refill(&self, uuid: Uuid) {
        let params = self.inner.lock().params_cache.get(&uuid).cloned();
        let Some(params) = params else { return };
        if !self.inner.lock().creating_idle.insert(uuid) {
            return; // already in flight
        }
        let pool = self.handle();
        tokio::spawn(async move {
            pool.fill_idle(uuid, params).await;
        });
    }

    /// `ensureIdle`: for each UUID without an idle connection or in-flight
    /// creation, create one.
    pub async fn ensure_idle(&self, server_params: HashMap<Uuid, ConnectionParams>) {
        for (uuid, params) in server_params {
            self.inner.lock().params_cache.insert(uuid, params.clone());
            let has_idle_or_creating = {
                let inner = self.inner.lock();
                inner.idle.contains_key(&uuid) || inner.creating_idle.contains(&uuid)
            };
            if has_idle_or_creating {
                continue;
            }
            self.spawn_idle_refill(uuid);
        }
    }

    /// `invalidateIdle`: replace cached params, close any existing idle,
    /// cancel in-flight creation (the in-flight task discovers the params
    /// changed and discards its result on completion), start fresh idle
    /// creation.
    pub async fn invalidate_idle(&self, uuid: Uuid, new_params: ConnectionParams) {
        let old_idle = {
            let mut inner = self.inner.lock();
            inner.params_cache.insert(uuid, new_params);
            inner.creating_idle.remove(&uuid);
            inner.idle.remove(&uuid)
        };
        if let Some(conn) = old_idle {
            let _ = conn.close().await;
        }
        self.spawn_idle_refill(uuid);
    }

    /// `cleanupIdle`: close idle, drop from params cache, cancel in-flight
    /// creation.
    pub async fn cleanup_idle(&self, uuid: Uuid) {
        let idle = {
            let mut inner = self.inner.lock();
            inner.creating_idle.remove(&uuid);
            inner.params_cache.remove(&uuid);
            inner.idle.remove(&uuid)
        };
        if let Some(conn) = idle {
            let _ = conn.close().await;
        }
    }

    /// `cleanupSession`: close every active connection for this session,
    /// drop the session's entries, and trigger best-effort idle refill for
    /// each released UUID.
    pub async fn cleanup_session(&self, session_id: &str) {
        let (conns, uuids): (Vec<Arc<UpstreamClient>>, Vec<Uuid>) = {
            let mut inner = self.inner.lock();
            inner.session_to_servers.remove(session_id);
            match inner.active.remove(session_id) {
                Some(map) => map.into_iter().map(|(u, c)| (c, u)).unzip(),
                None => (Vec::new(), Vec::new()),
            }
        };
        for conn in &conns {
            let _ = conn.close().await;
        }
        for uuid in uuids {
            self.spawn_idle_refill(uuid);
        }
    }

    /// `cleanupAll`: close everything, reset all maps.
    pub async fn cleanup_all(&self) {
        let (idle_conns, active_conns) = {
            let mut inner = self.inner.lock();
            let idle: Vec<_> = inner.idle.drain().map(|(_, c)| c).collect();
            let active: Vec<_> = inner.active.drain().flat_map(|(_, m)| m.into_values()).collect();
            inner.session_to_servers.clear();
            inner.creating_idle.clear();
            inner.params_cache.clear();
            (idle, active)
        };
        for conn in idle_conns.into_iter().chain(active_conns) {
            let _ = conn.close().await;
        }
    }

    /// `handleCrash`: record the crash, then close the idle connection and
    /// every active connection (across all sessions) for this UUID.
    pub async fn handle_crash(&self, uuid: Uuid, exit_code: Option<i32>, signal: Option<i32>) {
        self.error_tracker.record_crash(uuid, exit_code, signal).await;

        let (idle_conn, active_conns): (Option<Arc<UpstreamClient>>, Vec<Arc<UpstreamClient>>) = {
            let mut inner = self.inner.lock();
            let idle = inner.idle.remove(&uuid);
            let mut active = Vec::new();
            for (session_id, map) in &mut inner.active {
                if let Some(conn) = map.remove(&uuid) {
                    active.push(conn);
                    if let Some(set) = inner.session_to_servers.get_mut(session_id) {
                        set.remove(&uuid);
                    }
                }
            }
            (idle, active)
        };

        if let Some(conn) = idle_conn {
            let _ = conn.close().await;
        }
        for conn in active_conns {
            let _ = conn.close().await;
        }
    }

    async fn fill_idle(&self, uuid: Uuid, params: ConnectionParams) {
        let result = self.create_connection(uuid, &params).await;
        let mut inner = self.inner.lock();
        inner.creating_idle.remove(&uuid);
        // Discard if the params were invalidated while we were connecting,
        // or if an idle slot somehow already exists.
        let still_current = inner.params_cache.get(&uuid) == Some(&params);
        match result {
            Ok(conn) if still_current && !inner.idle.contains_key(&uuid) => {
                inner.idle.insert(uuid, conn);
            }
            Ok(conn) => {
                drop(inner);
                let _ = conn.close().await;
            }
            Err(e) => {
                tracing::debug!(%uuid, error = %e, "idle connection fill failed");
            }
        }
    }

    /// Opens a fresh connection, retrying up to `max-attempts(uuid)` with a
    /// 5 s delay, rechecking error-tracker status between attempts.
    async fn create_connection(&self, uuid: Uuid, params: &ConnectionParams) -> PoolResult<Arc<UpstreamClient>> {
        let max_attempts = self.error_tracker.max_attempts(uuid).max(1);
        let mut last_err = None;

        for attempt in 0..max_attempts {
            if self.error_tracker.is_in_error(uuid).await {
                return Err(PoolError::ServerInError);
            }

            let transport = build_transport(params.kind, &params.params, &self.cooldown, self.docker_url_rewrite)?;
            match connect(transport).await {
                Ok(client) => {
                    let pool = self.handle();
                    client.set_crash_handler(Arc::new(move |exit_code, signal| {
                        let pool = pool.clone();
                        tokio::spawn(async move {
                            pool.handle_crash(uuid, exit_code, signal).await;
                        });
                    }));
                    return Ok(client);
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        self.error_tracker.record_crash(uuid, None, None).await;
        Err(last_err.unwrap_or(PoolError::ConnectionFailed("exhausted retries".into())))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as Map;

    use metamcp_store::{ErrorStatus, InMemoryStore};

    use super::*;

    fn stdio_params(command: &str) -> ConnectionParams {
        ConnectionParams {
            kind: ServerKind::Stdio,
            params: ServerParams::Stdio {
                command: command.to_string(),
                args: vec![],
                environment: Map::new(),
            },
        }
    }

    fn tracker_with_server(uuid: Uuid) -> Arc<ErrorTracker> {
        let store = InMemoryStore::new();
        store.insert_server(metamcp_store::UpstreamServer {
            uuid,
            name: "alpha".into(),
            kind: ServerKind::Stdio,
            params: stdio_params("cat").params,
            error_status: ErrorStatus::None,
            max_attempts: None,
        });
        Arc::new(ErrorTracker::new(Arc::new(store)))
    }

    #[tokio::test]
    async fn get_session_skips_connection_attempts_for_servers_in_error() {
        let uuid = Uuid::new_v4();
        let tracker = tracker_with_server(uuid);
        tracker.record_crash(uuid, None, None).await; // default max_attempts=1 promotes immediately
        assert!(tracker.is_in_error(uuid).await);

        let pool = ServerPool::new(tracker, false);
        let result = pool.get_session("session-a", uuid, stdio_params("cat")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn cleanup_session_and_cleanup_all_are_no_ops_on_empty_pool() {
        let uuid = Uuid::new_v4();
        let tracker = tracker_with_server(uuid);
        let pool = ServerPool::new(tracker, false);

        pool.cleanup_session("nonexistent").await;
        pool.cleanup_all().await;
        pool.cleanup_idle(uuid).await;
    }

    #[tokio::test]
    async fn handle_crash_on_untracked_uuid_does_not_panic() {
        let uuid = Uuid::new_v4();
        let tracker = tracker_with_server(uuid);
        let pool = ServerPool::new(tracker, false);

        pool.handle_crash(uuid, Some(1), None).await;
        assert!(pool.error_tracker.is_in_error(uuid).await);
    }
}

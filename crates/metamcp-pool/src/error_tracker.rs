//! Process-wide crash counter with threshold promotion to `ErrorStatus::Error`.
//!
//! One lock guards the whole counter map (§4.3: "protected by its own
//! lock"); concurrent crashes for the same UUID serialize on it so
//! promotion happens at most once.

use std::collections::HashMap;
use std::sync::Arc;

use metamcp_store::{ErrorStatus, UpstreamServerStore};
use parking_lot::Mutex;
use uuid::Uuid;

const DEFAULT_MAX_ATTEMPTS: u32 = 1;

#[derive(Default)]
struct Counters {
    attempts: HashMap<Uuid, u32>,
    max_attempts: HashMap<Uuid, u32>,
}

pub struct ErrorTracker {
    store: Arc<dyn UpstreamServerStore>,
    counters: Mutex<Counters>,
}

impl ErrorTracker {
    #[must_use]
    pub fn new(store: Arc<dyn UpstreamServerStore>) -> Self {
        Self {
            store,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Overrides the default max-attempts-before-promotion for one server.
    pub fn set_max_attempts(&self, uuid: Uuid, max_attempts: u32) {
        self.counters.lock().max_attempts.insert(uuid, max_attempts);
    }

    /// The configured override, or the default of 1.
    #[must_use]
    pub fn max_attempts(&self, uuid: Uuid) -> u32 {
        Self::max_attempts_for(&self.counters.lock(), uuid)
    }

    fn max_attempts_for(counters: &Counters, uuid: Uuid) -> u32 {
        counters.max_attempts.get(&uuid).copied().unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    /// Increments the crash counter; promotes to ERROR once it reaches
    /// `max-attempts(uuid)`. Returns `true` if this call triggered promotion.
    pub async fn record_crash(&self, uuid: Uuid, exit_code: Option<i32>, signal: Option<i32>) -> bool {
        let (count, limit) = {
            let mut counters = self.counters.lock();
            let limit = Self::max_attempts_for(&counters, uuid);
            let count = counters.attempts.entry(uuid).or_insert(0);
            *count += 1;
            (*count, limit)
        };

        tracing::warn!(%uuid, ?exit_code, ?signal, count, limit, "upstream crash recorded");

        if count >= limit {
            if let Err(err) = self.store.set_error_status(uuid, ErrorStatus::Error).await {
                tracing::error!(%uuid, %err, "failed to persist ERROR status after crash threshold");
            }
            true
        } else {
            false
        }
    }

    pub async fn is_in_error(&self, uuid: Uuid) -> bool {
        matches!(self.store.error_status(uuid).await, Ok(ErrorStatus::Error))
    }

    /// Clears the counter and writes `NONE` back to the store.
    pub async fn reset(&self, uuid: Uuid) {
        self.counters.lock().attempts.remove(&uuid);
        if let Err(err) = self.store.set_error_status(uuid, ErrorStatus::None).await {
            tracing::error!(%uuid, %err, "failed to reset error status");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as Map;

    use metamcp_store::{InMemoryStore, ServerKind, ServerParams};

    use super::*;

    fn store_with_server(uuid: Uuid) -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        store.insert_server(metamcp_store::UpstreamServer {
            uuid,
            name: "alpha".into(),
            kind: ServerKind::Stdio,
            params: ServerParams::Stdio {
                command: "echo".into(),
                args: vec![],
                environment: Map::new(),
            },
            error_status: ErrorStatus::None,
            max_attempts: None,
        });
        Arc::new(store)
    }

    #[tokio::test]
    async fn promotes_to_error_on_first_crash_by_default() {
        let uuid = Uuid::new_v4();
        let store = store_with_server(uuid);
        let tracker = ErrorTracker::new(store.clone());

        let promoted = tracker.record_crash(uuid, Some(1), None).await;
        assert!(promoted);
        assert!(tracker.is_in_error(uuid).await);
    }

    #[tokio::test]
    async fn respects_per_server_max_attempts_override() {
        let uuid = Uuid::new_v4();
        let store = store_with_server(uuid);
        let tracker = ErrorTracker::new(store.clone());
        tracker.set_max_attempts(uuid, 3);

        assert!(!tracker.record_crash(uuid, None, None).await);
        assert!(!tracker.is_in_error(uuid).await);
        assert!(!tracker.record_crash(uuid, None, None).await);
        assert!(tracker.record_crash(uuid, None, None).await);
        assert!(tracker.is_in_error(uuid).await);
    }

    #[tokio::test]
    async fn reset_clears_counter_and_status() {
        let uuid = Uuid::new_v4();
        let store = store_with_server(uuid);
        let tracker = ErrorTracker::new(store.clone());

        tracker.record_crash(uuid, None, None).await;
        assert!(tracker.is_in_error(uuid).await);

        tracker.reset(uuid).await;
        assert!(!tracker.is_in_error(uuid).await);

        // Counter was cleared too: a fresh crash needs the full threshold again.
        assert!(tracker.record_crash(uuid, None, None).await);
    }
}

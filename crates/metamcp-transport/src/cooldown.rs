//! Global cooldown map for stdio upstreams that just failed to start.
//!
//! Keyed by the resolved (command, args, effective environment) tuple so
//! that retrying the *same* misconfigured server fails fast instead of
//! re-spawning a process that is known to immediately exit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub const STARTUP_WINDOW: Duration = Duration::from_secs(5);
pub const COOLDOWN_DURATION: Duration = Duration::from_secs(10);

/// Substrings in stderr or a spawn error that are treated as a startup
/// failure signature even if the process technically stayed alive briefly.
pub const STARTUP_ERROR_SIGNATURES: &[&str] =
    &["MODULE_NOT_FOUND", "ENOENT", "no such file or directory"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub command: String,
    pub args: Vec<String>,
    pub environment: Vec<(String, String)>,
}

impl CooldownKey {
    pub fn new(command: &str, args: &[String], environment: &HashMap<String, String>) -> Self {
        let mut env: Vec<(String, String)> = environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();
        Self {
            command: command.to_string(),
            args: args.to_vec(),
            environment: env,
        }
    }
}

#[derive(Default)]
pub struct CooldownMap {
    entries: Mutex<HashMap<CooldownKey, Instant>>,
}

impl CooldownMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds remaining in cooldown for `key`, or `None` if it may start.
    pub fn remaining_secs(&self, key: &CooldownKey) -> Option<u64> {
        let entries = self.entries.lock();
        let until = entries.get(key)?;
        let now = Instant::now();
        if now >= *until {
            None
        } else {
            Some((*until - now).as_secs().max(1))
        }
    }

    /// Mark `key` as having just failed to start; it enters cooldown for
    /// [`COOLDOWN_DURATION`] from now.
    pub fn trigger(&self, key: CooldownKey) {
        let mut entries = self.entries.lock();
        entries.insert(key, Instant::now() + COOLDOWN_DURATION);
    }

    /// Drop stale cooldown entries (best-effort, called opportunistically).
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.lock().retain(|_, until| *until > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_key_has_no_cooldown() {
        let map = CooldownMap::new();
        let key = CooldownKey::new("node", &["server.js".to_string()], &HashMap::new());
        assert_eq!(map.remaining_secs(&key), None);
    }

    #[test]
    fn triggered_key_reports_remaining_seconds() {
        let map = CooldownMap::new();
        let key = CooldownKey::new("node", &["server.js".to_string()], &HashMap::new());
        map.trigger(key.clone());
        let remaining = map.remaining_secs(&key).expect("should be in cooldown");
        assert!(remaining > 0 && remaining <= 10);
    }

    #[test]
    fn different_args_are_independent_keys() {
        let map = CooldownMap::new();
        let a = CooldownKey::new("node", &["a.js".to_string()], &HashMap::new());
        let b = CooldownKey::new("node", &["b.js".to_string()], &HashMap::new());
        map.trigger(a);
        assert_eq!(map.remaining_secs(&b), None);
    }
}

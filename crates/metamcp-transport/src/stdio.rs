//! Stdio transport: spawns a child process and frames newline-delimited
//! JSON-RPC over its stdin/stdout, per spec §4.1's "Stdio variant".
//!
//! Follows the same interior-mutability split the rest of this codebase
//! uses for process handles: `std::sync::Mutex`/`parking_lot::Mutex` for
//! state that never crosses an `.await`, `tokio::sync::Mutex` for the
//! `Child` handle and channel senders that do.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::cooldown::{CooldownKey, CooldownMap, STARTUP_ERROR_SIGNATURES, STARTUP_WINDOW};
use crate::core::{Transport, TransportError, TransportEvent, TransportHandle, TransportResult, TransportState};

#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_directory: Option<String>,
    /// Configured environment, not yet resolved — resolution (`${VAR}`,
    /// default host env, `()`-prefix filtering) happens in `start()` via
    /// `metamcp_util::env::resolve_environment`.
    pub environment: HashMap<String, String>,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            working_directory: None,
            environment: HashMap::new(),
            startup_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            max_message_size: 10 * 1024 * 1024,
        }
    }
}

pub struct StdioTransport {
    config: StdioConfig,
    cooldown: Arc<CooldownMap>,
    state: Arc<SyncMutex<TransportState>>,
    started_at: Arc<SyncMutex<Option<Instant>>>,
    child: Arc<AsyncMutex<Option<Child>>>,
    stdin_tx: Arc<AsyncMutex<Option<mpsc::Sender<String>>>>,
}

impl StdioTransport {
    #[must_use]
    pub fn new(config: StdioConfig, cooldown: Arc<CooldownMap>) -> Self {
        Self {
            config,
            cooldown,
            state: Arc::new(SyncMutex::new(TransportState::Disconnected)),
            started_at: Arc::new(SyncMutex::new(None)),
            child: Arc::new(AsyncMutex::new(None)),
            stdin_tx: Arc::new(AsyncMutex::new(None)),
        }
    }

    fn cooldown_key(&self, resolved_env: &HashMap<String, String>) -> CooldownKey {
        CooldownKey::new(&self.config.command, &self.config.args, resolved_env)
    }

}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> TransportResult<TransportHandle> {
        if self.config.command.is_empty() {
            return Err(TransportError::Configuration("command cannot be empty".into()));
        }

        let resolved_env = metamcp_util::resolve_environment(&self.config.environment);
        let key = self.cooldown_key(&resolved_env);
        if let Some(remaining) = self.cooldown.remaining_secs(&key) {
            return Err(TransportError::Cooldown { remaining_secs: remaining });
        }

        *self.state.lock() = TransportState::Connecting;
        info!(command = %self.config.command, ?self.config.args, "spawning stdio upstream");

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .envs(&resolved_env);
        if let Some(ref wd) = self.config.working_directory {
            cmd.current_dir(wd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.cooldown.trigger(key);
                *self.state.lock() = TransportState::Failed;
                return Err(TransportError::ConnectionFailed(format!("spawn failed: {e}")));
            }
        };

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("no stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("no stdout handle".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("no stderr handle".into()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(256);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);

        tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);
            while let Some(line) = stdin_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                    || writer.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let max_size = self.config.max_message_size;
        let stdout_events = event_tx.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.len() > max_size {
                            warn!(size = line.len(), "oversized message from stdio upstream, dropping");
                            continue;
                        }
                        if stdout_events.send(TransportEvent::Message(line)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        });

        let stderr_events = event_tx.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            let mut saw_startup_error = false;
            while let Ok(Some(line)) = lines.next_line().await {
                if STARTUP_ERROR_SIGNATURES.iter().any(|sig| line.contains(sig)) {
                    saw_startup_error = true;
                }
                debug!(line = %line, "stdio upstream stderr");
                let _ = stderr_events.send(TransportEvent::Log(line)).await;
            }
            saw_startup_error
        });

        // Give the process a brief grace period to exit immediately (bad
        // interpreter shebang, missing dependency) before declaring it
        // connected; bounded by startup_timeout.
        let grace = Duration::from_millis(50).min(self.config.startup_timeout);
        let _ = timeout(self.config.startup_timeout, tokio::time::sleep(grace)).await;
        if let Ok(Some(status)) = child.try_wait() {
            self.cooldown.trigger(key);
            *self.state.lock() = TransportState::Failed;
            return Err(TransportError::ConnectionFailed(format!(
                "process exited immediately with status: {status}"
            )));
        }

        *self.started_at.lock() = Some(Instant::now());
        *self.state.lock() = TransportState::Connected;
        *self.child.lock().await = Some(child);

        // Poll with try_wait rather than an awaiting wait() so the lock is
        // never held across an indefinite await — close() needs to be able
        // to grab the child and send a kill signal at any time.
        let state = self.state.clone();
        let started_at = self.started_at.clone();
        let cooldown = self.cooldown.clone();
        let child_handle = self.child.clone();
        let wait_events = event_tx.clone();
        let wait_key = key.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let mut guard = child_handle.lock().await;
                let Some(child) = guard.as_mut() else { break };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        *guard = None;
                        drop(guard);
                        *state.lock() = TransportState::Disconnected;
                        let was_fast = started_at
                            .lock()
                            .map(|t| t.elapsed() < STARTUP_WINDOW)
                            .unwrap_or(false);
                        if was_fast || !status.success() {
                            cooldown.trigger(wait_key);
                        }
                        let _ = wait_events
                            .send(TransportEvent::Crashed {
                                exit_code: status.code(),
                                signal: None,
                            })
                            .await;
                        break;
                    }
                    Ok(None) => {} // still running
                    Err(e) => {
                        error!(error = %e, "failed to poll stdio upstream child");
                        *state.lock() = TransportState::Failed;
                        break;
                    }
                }
            }
        });

        *self.stdin_tx.lock().await = Some(stdin_tx);

        Ok(TransportHandle { events: event_rx })
    }

    async fn send(&self, message: String) -> TransportResult<()> {
        if *self.state.lock() != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        let guard = self.stdin_tx.lock().await;
        let Some(tx) = guard.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        tx.send(message)
            .await
            .map_err(|_| TransportError::ConnectionLost("stdin channel closed".into()))
    }

    async fn close(&self) -> TransportResult<()> {
        if *self.state.lock() == TransportState::Disconnected {
            return Ok(());
        }
        *self.stdin_tx.lock().await = None;
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = timeout(self.config.shutdown_timeout, child.wait()).await;
        }
        *self.state.lock() = TransportState::Disconnected;
        Ok(())
    }

    async fn state(&self) -> TransportState {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_command_is_configuration_error() {
        let transport = StdioTransport::new(StdioConfig::default(), Arc::new(CooldownMap::new()));
        let err = transport.start().await.unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[tokio::test]
    async fn cat_echoes_a_line() {
        let config = StdioConfig {
            command: "cat".to_string(),
            ..Default::default()
        };
        let transport = StdioTransport::new(config, Arc::new(CooldownMap::new()));
        let mut handle = match transport.start().await {
            Ok(h) => h,
            Err(_) => return, // environment without `cat` available; skip
        };
        transport.send("hello".to_string()).await.unwrap();
        if let Some(event) = handle.events.recv().await {
            if let TransportEvent::Message(line) = event {
                assert_eq!(line, "hello");
            }
        }
        let _ = transport.close().await;
    }

    #[tokio::test]
    async fn nonexistent_command_triggers_cooldown() {
        let cooldown = Arc::new(CooldownMap::new());
        let config = StdioConfig {
            command: "metamcp-definitely-not-a-real-binary".to_string(),
            ..Default::default()
        };
        let transport = StdioTransport::new(config, cooldown.clone());
        assert!(transport.start().await.is_err());
        let resolved = metamcp_util::resolve_environment(&HashMap::new());
        let key = CooldownKey::new("metamcp-definitely-not-a-real-binary", &[], &resolved);
        assert!(cooldown.remaining_secs(&key).is_some());
    }
}

//! Reads the operational timeout/progress-reset configuration a `tools/call`
//! fan-out honors, per §4.5.

use std::time::Duration;

use metamcp_client::RequestOptions;

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// `MCP_TIMEOUT`, `MCP_MAX_TOTAL_TIMEOUT`, `MCP_RESET_TIMEOUT_ON_PROGRESS`
/// (all milliseconds / boolean), falling back to `RequestOptions::new()`'s
/// defaults when unset or unparsable.
#[must_use]
pub fn operational_request_options() -> RequestOptions {
    let mut options = RequestOptions::new();
    if let Some(ms) = env_u64("MCP_TIMEOUT") {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = env_u64("MCP_MAX_TOTAL_TIMEOUT") {
        options = options.with_max_total_timeout(Duration::from_millis(ms));
    }
    if let Some(reset) = env_bool("MCP_RESET_TIMEOUT_ON_PROGRESS") {
        options.reset_timeout_on_progress = reset;
    }
    options
}

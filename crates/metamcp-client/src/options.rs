use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Per-request options, per spec §4.2.
#[derive(Clone)]
pub struct RequestOptions {
    /// External cancellation; cancelling fires before any timeout.
    pub signal: Option<CancellationToken>,
    /// Wall-clock bound, reset by matching progress notifications when
    /// `reset_timeout_on_progress` is true.
    pub timeout: Option<Duration>,
    /// Hard ceiling independent of progress resets.
    pub max_total_timeout: Option<Duration>,
    /// Defaults to `true` per spec §4.2.
    pub reset_timeout_on_progress: bool,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            signal: None,
            timeout: Some(Duration::from_secs(30)),
            max_total_timeout: None,
            reset_timeout_on_progress: true,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_total_timeout(mut self, timeout: Duration) -> Self {
        self.max_total_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new()
    }
}

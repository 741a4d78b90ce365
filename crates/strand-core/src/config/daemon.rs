use super::backoff::BackoffStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the projection daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Sleep after an empty page before fetching again (milliseconds)
    /// Default: 250ms
    #[serde(default = "default_fetching_cooldown_ms")]
    pub fetching_cooldown_ms: u64,

    /// Events committed more recently than this are withheld (milliseconds)
    /// Default: 1000ms
    #[serde(default = "default_leading_edge_buffer_ms")]
    pub leading_edge_buffer_ms: u64,

    /// Page size for projections without a size hint
    /// Default: 500
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Backoff for transient store failures (fetch, checkpoint I/O)
    #[serde(default)]
    pub fetch_backoff: BackoffStrategy,

    /// Poll interval used while waiting for shards to catch up (milliseconds)
    /// Default: 25ms
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
}

fn default_fetching_cooldown_ms() -> u64 {
    250
}

fn default_leading_edge_buffer_ms() -> u64 {
    1000
}

fn default_page_size() -> usize {
    500
}

fn default_status_poll_interval_ms() -> u64 {
    25
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            fetching_cooldown_ms: default_fetching_cooldown_ms(),
            leading_edge_buffer_ms: default_leading_edge_buffer_ms(),
            default_page_size: default_page_size(),
            fetch_backoff: BackoffStrategy::default(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
        }
    }
}

impl DaemonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetching_cooldown(mut self, cooldown: Duration) -> Self {
        self.fetching_cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    pub fn with_leading_edge_buffer(mut self, buffer: Duration) -> Self {
        self.leading_edge_buffer_ms = buffer.as_millis() as u64;
        self
    }

    pub fn with_default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size;
        self
    }

    pub fn with_fetch_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.fetch_backoff = backoff;
        self
    }

    pub fn with_status_poll_interval(mut self, interval: Duration) -> Self {
        self.status_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn fetching_cooldown(&self) -> Duration {
        Duration::from_millis(self.fetching_cooldown_ms)
    }

    pub fn leading_edge_buffer(&self) -> Duration {
        Duration::from_millis(self.leading_edge_buffer_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }
}

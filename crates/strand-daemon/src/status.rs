//! Shard status snapshots and fault reports.

use crate::policy::TerminalAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strand_core::{EventPage, Sequence};

/// Where a shard is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardState {
    /// Spawned, running setup
    Idle,
    Fetching,
    /// Caught up; sleeping before the next fetch
    Cooldown,
    Applying,
    /// Waiting out a retry delay
    Backoff,
    Stopped,
    /// Setup failed or the task panicked
    Faulted,
}

impl ShardState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShardState::Stopped | ShardState::Faulted)
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShardState::Idle => "idle",
            ShardState::Fetching => "fetching",
            ShardState::Cooldown => "cooldown",
            ShardState::Applying => "applying",
            ShardState::Backoff => "backoff",
            ShardState::Stopped => "stopped",
            ShardState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Bounds of the page a shard is working on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageBounds {
    pub floor: Sequence,
    pub ceiling: Sequence,
    pub events: usize,
}

impl From<&EventPage> for PageBounds {
    fn from(page: &EventPage) -> Self {
        Self {
            floor: page.floor,
            ceiling: page.ceiling,
            events: page.len(),
        }
    }
}

/// Point-in-time view of one shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardStatus {
    pub projection: String,
    pub state: ShardState,
    /// Last committed checkpoint
    pub last_sequence: Sequence,
    /// Highest sequence known to have no unapplied consumed events at or below it
    pub processed_through: Sequence,
    /// Failed attempts on the current page
    pub attempt_count: u32,
    pub current_page: Option<PageBounds>,
    pub last_error: Option<String>,
    pub pages_applied: u64,
    pub events_applied: u64,
    pub updated_at: DateTime<Utc>,
}

impl ShardStatus {
    pub fn new(projection: impl Into<String>) -> Self {
        Self {
            projection: projection.into(),
            state: ShardState::Idle,
            last_sequence: 0,
            processed_through: 0,
            attempt_count: 0,
            current_page: None,
            last_error: None,
            pages_applied: 0,
            events_applied: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Distance between the log head and what this shard has processed
    pub fn lag(&self, current_max: Sequence) -> u64 {
        current_max.saturating_sub(self.processed_through)
    }
}

/// Report emitted whenever a shard hits a terminal action or fails setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardFault {
    pub projection: String,
    pub action: TerminalAction,
    /// Error message including its cause chain
    pub error: String,
    pub attempts: u32,
    pub floor: Sequence,
    pub ceiling: Sequence,
    pub occurred_at: DateTime<Utc>,
}

/// Diagnostic sink for shard faults
pub type FaultHandler = Arc<dyn Fn(&ShardFault) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lag_saturates() {
        let mut status = ShardStatus::new("p");
        status.processed_through = 40;
        assert_eq!(status.lag(100), 60);
        assert_eq!(status.lag(10), 0);
    }

    #[test]
    fn test_terminal_states() {
        let mut status = ShardStatus::new("p");
        assert!(status.is_running());
        status.state = ShardState::Faulted;
        assert!(!status.is_running());
        assert_eq!(status.state.to_string(), "faulted");
    }
}

use crate::error::Result;
use crate::types::{Event, EventTypeFilter, Sequence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read request against the event log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// Exclusive lower bound
    pub after: Sequence,

    /// Inclusive upper bound
    pub up_to: Sequence,

    /// Maximum number of events to return
    pub limit: usize,

    /// Event types to include
    pub filter: EventTypeFilter,
}

/// Event store: read side of the append-only event log
///
/// Shards only read from the store and may do so concurrently without
/// coordination. Appending is a concern of the concrete store.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events with `after < sequence <= up_to` matching the filter, ascending,
    /// at most `limit` of them
    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<Event>>;

    /// Highest committed sequence (0 when the log is empty)
    async fn current_max_sequence(&self) -> Result<Sequence>;

    /// Highest sequence `S` such that every event with sequence `<= S` was
    /// committed at or before `committed_before`.
    ///
    /// Events past `S` may still have earlier, not-yet-visible siblings and
    /// must not be handed to projections.
    async fn high_water_mark(&self, committed_before: DateTime<Utc>) -> Result<Sequence>;
}

//! In-memory collaborators
//!
//! Ephemeral implementations of the event, progression and dead-letter stores.
//! Used by tests and by hosts that run a daemon without durable storage.
//! The event store supports explicit commit timestamps and injected fetch
//! failures so leading-edge and transient-error behavior can be exercised.

use crate::error::{Result, StrandError};
use crate::traits::{DeadLetterStore, EventQuery, EventStore, ProgressionStore};
use crate::types::{DeadLetterRecord, Event, NewEvent, ProjectionCheckpoint, Sequence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

#[derive(Default)]
struct MemoryLog {
    events: Vec<Event>,
    stream_heads: HashMap<String, u64>,
    failing_fetches: u32,
    fetch_calls: Vec<Instant>,
}

/// Event store held entirely in memory
#[derive(Default)]
pub struct InMemoryEventStore {
    log: Mutex<MemoryLog>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append events to a stream, committed now
    pub fn append(&self, stream_id: &str, events: Vec<NewEvent>) -> Vec<Event> {
        self.append_at(stream_id, events, Utc::now())
    }

    /// Append events to a stream with an explicit commit timestamp.
    ///
    /// Sequences are still assigned in append order, so a timestamp later
    /// than a subsequent append models a transaction that reserved its
    /// sequence early but committed late.
    pub fn append_at(
        &self,
        stream_id: &str,
        events: Vec<NewEvent>,
        timestamp: DateTime<Utc>,
    ) -> Vec<Event> {
        let mut log = self.log.lock();
        let mut next_sequence = log.events.last().map(|e| e.sequence).unwrap_or(0) + 1;
        let mut stream_head = log.stream_heads.get(stream_id).copied().unwrap_or(0);

        let mut appended = Vec::with_capacity(events.len());
        for new_event in events {
            stream_head += 1;
            let event = Event {
                sequence: next_sequence,
                stream_id: stream_id.to_string(),
                stream_sequence: stream_head,
                event_type: new_event.event_type,
                data: new_event.data,
                timestamp,
            };
            next_sequence += 1;
            log.events.push(event.clone());
            appended.push(event);
        }

        log.stream_heads.insert(stream_id.to_string(), stream_head);
        appended
    }

    /// Make the next `count` fetches fail with a store error
    pub fn fail_next_fetches(&self, count: u32) {
        self.log.lock().failing_fetches = count;
    }

    /// Instants at which `fetch_events` was called
    pub fn fetch_calls(&self) -> Vec<Instant> {
        self.log.lock().fetch_calls.clone()
    }

    pub fn len(&self) -> usize {
        self.log.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let mut log = self.log.lock();
        log.fetch_calls.push(Instant::now());

        if log.failing_fetches > 0 {
            log.failing_fetches -= 1;
            return Err(StrandError::Store("event store unavailable".into()));
        }

        Ok(log
            .events
            .iter()
            .filter(|e| e.sequence > query.after && e.sequence <= query.up_to)
            .filter(|e| query.filter.matches(&e.event_type))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn current_max_sequence(&self) -> Result<Sequence> {
        Ok(self.log.lock().events.last().map(|e| e.sequence).unwrap_or(0))
    }

    async fn high_water_mark(&self, committed_before: DateTime<Utc>) -> Result<Sequence> {
        let log = self.log.lock();
        let max = log.events.last().map(|e| e.sequence).unwrap_or(0);
        Ok(log
            .events
            .iter()
            .find(|e| e.timestamp > committed_before)
            .map(|e| e.sequence - 1)
            .unwrap_or(max))
    }
}

#[derive(Default)]
struct MemoryProgress {
    checkpoints: BTreeMap<String, Sequence>,
    history: Vec<ProjectionCheckpoint>,
    failing_writes: u32,
}

/// Progression store held entirely in memory
#[derive(Default)]
pub struct InMemoryProgressionStore {
    progress: Mutex<MemoryProgress>,
}

impl InMemoryProgressionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted checkpoint write for a projection, in order
    pub fn history(&self, projection: &str) -> Vec<Sequence> {
        self.progress
            .lock()
            .history
            .iter()
            .filter(|c| c.projection == projection)
            .map(|c| c.last_sequence)
            .collect()
    }

    /// Make the next `count` checkpoint writes fail with a store error
    pub fn fail_next_writes(&self, count: u32) {
        self.progress.lock().failing_writes = count;
    }
}

#[async_trait]
impl ProgressionStore for InMemoryProgressionStore {
    async fn get_checkpoint(&self, projection: &str) -> Result<Sequence> {
        Ok(self
            .progress
            .lock()
            .checkpoints
            .get(projection)
            .copied()
            .unwrap_or(0))
    }

    async fn set_checkpoint(&self, projection: &str, sequence: Sequence) -> Result<()> {
        let mut progress = self.progress.lock();
        if progress.failing_writes > 0 {
            progress.failing_writes -= 1;
            return Err(StrandError::Store("progression store unavailable".into()));
        }

        let current = progress.checkpoints.get(projection).copied().unwrap_or(0);
        if sequence > current {
            progress.checkpoints.insert(projection.to_string(), sequence);
            progress
                .history
                .push(ProjectionCheckpoint::new(projection, sequence));
        }
        Ok(())
    }

    async fn reset_checkpoint(&self, projection: &str) -> Result<()> {
        self.progress.lock().checkpoints.remove(projection);
        Ok(())
    }

    async fn list_checkpoints(&self) -> Result<Vec<ProjectionCheckpoint>> {
        Ok(self
            .progress
            .lock()
            .checkpoints
            .iter()
            .map(|(name, seq)| ProjectionCheckpoint::new(name.clone(), *seq))
            .collect())
    }
}

/// Dead-letter store held entirely in memory
#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn record(&self, record: &DeadLetterRecord) -> Result<i64> {
        let mut records = self.records.lock();
        records.push(record.clone());
        Ok(records.len() as i64)
    }

    async fn list(&self, projection: &str, limit: usize) -> Result<Vec<DeadLetterRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.projection == projection)
            .take(limit)
            .cloned()
            .collect())
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strand_core::{
    BackoffStrategy, DaemonConfig, EventPage, EventTypeFilter, InMemoryEventStore,
    InMemoryProgressionStore, NewEvent, Projection, Sequence, StrandError,
};
use strand_daemon::{ProjectionDaemon, ProjectionDaemonBuilder, ShardFault};

#[derive(Debug, thiserror::Error)]
#[error("transient failure")]
pub struct TransientError;

#[derive(Debug, thiserror::Error)]
#[error("poison event in page ending at {0}")]
pub struct PoisonError(pub Sequence);

#[derive(Debug, thiserror::Error)]
#[error("fatal failure")]
pub struct FatalError;

/// Decides whether the n-th apply call (1-based) on a page fails
pub type Behavior = Box<dyn Fn(&EventPage, usize) -> anyhow::Result<()> + Send + Sync>;

/// Projection that records every apply call
pub struct TestProjection {
    name: String,
    consumes: EventTypeFilter,
    page_size: Option<usize>,
    behavior: Option<Behavior>,
    apply_delay: Duration,
    fail_setup: bool,
    fail_teardown: bool,
    calls: Mutex<Vec<(Sequence, Vec<Sequence>)>>,
    applied: Mutex<Vec<Sequence>>,
    teardowns: AtomicUsize,
}

impl TestProjection {
    pub fn new(name: &str, consumes: EventTypeFilter) -> Self {
        Self {
            name: name.to_string(),
            consumes,
            page_size: None,
            behavior: None,
            apply_delay: Duration::ZERO,
            fail_setup: false,
            fail_teardown: false,
            calls: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            teardowns: AtomicUsize::new(0),
        }
    }

    pub fn all(name: &str) -> Self {
        Self::new(name, EventTypeFilter::All)
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn with_behavior<F>(mut self, behavior: F) -> Self
    where
        F: Fn(&EventPage, usize) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.behavior = Some(Box::new(behavior));
        self
    }

    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    pub fn with_failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    pub fn with_failing_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }

    /// (floor, sequences) of every apply call, including failed ones
    pub fn calls(&self) -> Vec<(Sequence, Vec<Sequence>)> {
        self.calls.lock().clone()
    }

    /// Sequences from successful applies, in order
    pub fn applied(&self) -> Vec<Sequence> {
        self.applied.lock().clone()
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Projection for TestProjection {
    fn name(&self) -> &str {
        &self.name
    }

    fn consumes(&self) -> EventTypeFilter {
        self.consumes.clone()
    }

    fn page_size_hint(&self) -> Option<usize> {
        self.page_size
    }

    async fn ensure_storage_exists(&self) -> strand_core::Result<()> {
        if self.fail_setup {
            return Err(StrandError::Store("read model unavailable".into()));
        }
        Ok(())
    }

    async fn apply(&self, page: &EventPage) -> anyhow::Result<()> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push((page.floor, page.sequences()));
            calls
                .iter()
                .filter(|(floor, _)| *floor == page.floor)
                .count()
        };

        if !self.apply_delay.is_zero() {
            tokio::time::sleep(self.apply_delay).await;
        }
        if let Some(behavior) = &self.behavior {
            behavior(page, call)?;
        }

        self.applied.lock().extend(page.sequences());
        Ok(())
    }

    async fn teardown(&self) -> strand_core::Result<()> {
        if self.fail_teardown {
            return Err(StrandError::Store("read model locked".into()));
        }
        self.applied.lock().clear();
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn events(event_type: &str, count: usize) -> Vec<NewEvent> {
    (0..count)
        .map(|i| NewEvent::new(event_type, json!({ "index": i })))
        .collect()
}

pub fn fast_config() -> DaemonConfig {
    DaemonConfig::default()
        .with_fetching_cooldown(Duration::from_millis(10))
        .with_leading_edge_buffer(Duration::ZERO)
        .with_fetch_backoff(BackoffStrategy::Fixed(Duration::from_millis(10)))
        .with_status_poll_interval(Duration::from_millis(5))
}

pub struct Harness {
    pub events: Arc<InMemoryEventStore>,
    pub progression: Arc<InMemoryProgressionStore>,
    pub faults: Arc<Mutex<Vec<ShardFault>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            events: Arc::new(InMemoryEventStore::new()),
            progression: Arc::new(InMemoryProgressionStore::new()),
            faults: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Builder wired to the harness stores, fast timings and a fault collector
    pub fn builder(&self) -> ProjectionDaemonBuilder {
        let faults = self.faults.clone();
        ProjectionDaemon::builder(self.events.clone(), self.progression.clone())
            .with_config(fast_config())
            .on_fault(move |fault| faults.lock().push(fault.clone()))
    }

    pub fn faults(&self) -> Vec<ShardFault> {
        self.faults.lock().clone()
    }
}

pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

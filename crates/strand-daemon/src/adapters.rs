//! Projection adapters
//!
//! - [`Blocking`]: run a synchronous projection on the blocking thread pool
//! - [`HandlerProjection`]: route each event of a page to a per-type handler
//!
//! # Example
//!
//! ```
//! use strand_core::Event;
//! use strand_daemon::{EventHandler, HandlerProjection};
//!
//! struct Deposits;
//!
//! impl EventHandler for Deposits {
//!     fn event_type(&self) -> &str {
//!         "deposit"
//!     }
//!
//!     fn handle(&self, event: &Event) -> anyhow::Result<()> {
//!         let _amount: i64 = event.decode()?;
//!         Ok(())
//!     }
//! }
//!
//! let projection = HandlerProjection::new("balances").with_handler(Deposits);
//! assert_eq!(projection.handler_count(), 1);
//! ```

use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use strand_core::{Event, EventPage, EventTypeFilter, Projection, Result, StrandError};

/// A projection whose work is synchronous (e.g. a local SQL write)
pub trait BlockingProjection: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn consumes(&self) -> EventTypeFilter;

    fn page_size_hint(&self) -> Option<usize> {
        None
    }

    fn ensure_storage_exists(&self) -> Result<()> {
        Ok(())
    }

    fn apply(&self, page: &EventPage) -> anyhow::Result<()>;

    fn teardown(&self) -> Result<()> {
        Ok(())
    }
}

/// Runs a [`BlockingProjection`] via `spawn_blocking` so it never stalls
/// the runtime's worker threads
pub struct Blocking<P> {
    inner: Arc<P>,
}

impl<P: BlockingProjection> Blocking<P> {
    pub fn new(projection: P) -> Self {
        Self {
            inner: Arc::new(projection),
        }
    }

    pub fn from_arc(projection: Arc<P>) -> Self {
        Self { inner: projection }
    }

    pub fn inner(&self) -> &Arc<P> {
        &self.inner
    }
}

#[async_trait]
impl<P: BlockingProjection> Projection for Blocking<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn consumes(&self) -> EventTypeFilter {
        self.inner.consumes()
    }

    fn page_size_hint(&self) -> Option<usize> {
        self.inner.page_size_hint()
    }

    async fn ensure_storage_exists(&self) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.ensure_storage_exists())
            .await
            .map_err(|e| StrandError::Internal(format!("Task join error: {}", e)))?
    }

    async fn apply(&self, page: &EventPage) -> anyhow::Result<()> {
        let inner = self.inner.clone();
        let page = page.clone();
        tokio::task::spawn_blocking(move || inner.apply(&page))
            .await
            .context("blocking projection task failed")?
    }

    async fn teardown(&self) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.teardown())
            .await
            .map_err(|e| StrandError::Internal(format!("Task join error: {}", e)))?
    }
}

/// Processes events of one type
pub trait EventHandler: Send + Sync {
    /// The event type this handler processes (e.g. "deposit")
    fn event_type(&self) -> &str;

    fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// Projection assembled from per-event-type handlers
///
/// Consumes exactly the event types it has handlers for and applies a
/// page's events one by one in sequence order. The first handler error
/// fails the whole page.
pub struct HandlerProjection {
    name: String,
    handlers: HashMap<String, Box<dyn EventHandler>>,
    page_size: Option<usize>,
}

impl HandlerProjection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
            page_size: None,
        }
    }

    /// Add a handler.
    ///
    /// # Panics
    ///
    /// Panics if a handler for the same event type is already registered.
    /// Use [`try_register`](Self::try_register) for fallible registration.
    pub fn with_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        let event_type = handler.event_type().to_string();
        if let Err(err) = self.try_register(Box::new(handler)) {
            panic!("duplicate handler for '{}': {}", event_type, err);
        }
        self
    }

    /// Add a handler, failing on a duplicate event type
    pub fn try_register(&mut self, handler: Box<dyn EventHandler>) -> Result<()> {
        let event_type = handler.event_type().to_string();
        if self.handlers.contains_key(&event_type) {
            return Err(StrandError::Config(format!(
                "projection '{}' already has a handler for '{}'",
                self.name, event_type
            )));
        }
        self.handlers.insert(event_type, handler);
        Ok(())
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
impl Projection for HandlerProjection {
    fn name(&self) -> &str {
        &self.name
    }

    fn consumes(&self) -> EventTypeFilter {
        EventTypeFilter::only(self.handlers.keys().cloned())
    }

    fn page_size_hint(&self) -> Option<usize> {
        self.page_size
    }

    async fn apply(&self, page: &EventPage) -> anyhow::Result<()> {
        for event in &page.events {
            let handler = self.handlers.get(&event.event_type).with_context(|| {
                format!(
                    "no handler for event type '{}' (sequence {})",
                    event.event_type, event.sequence
                )
            })?;

            handler.handle(event).with_context(|| {
                format!(
                    "handler '{}' failed on sequence {}",
                    event.event_type, event.sequence
                )
            })?;
        }
        Ok(())
    }
}

//! Strand: an asynchronous projection daemon over an append-only event log
//!
//! Strand provides:
//! - **Event log**: globally ordered, append-only events (SQLite or in-memory)
//! - **Projections**: read models fed pages of events in strict sequence order
//! - **Daemon**: one shard per projection with durable checkpoints
//! - **Exception policies**: retry, skip, stop-shard and stop-all per error type
//!
//! # Quick Start
//!
//! ```no_run
//! use strand::prelude::*;
//!
//! struct OrderCount;
//!
//! #[async_trait]
//! impl Projection for OrderCount {
//!     fn name(&self) -> &str {
//!         "order_count"
//!     }
//!
//!     fn consumes(&self) -> EventTypeFilter {
//!         EventTypeFilter::only(["order_placed"])
//!     }
//!
//!     async fn apply(&self, page: &EventPage) -> anyhow::Result<()> {
//!         tracing::info!(orders = page.len(), "Counted orders");
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let db = StrandDb::open("./data")?;
//! db.append("order-1", vec![NewEvent::new("order_placed", serde_json::json!({ "total": 12 }))])
//!     .await?;
//!
//! let daemon = db.daemon_builder().register(OrderCount).build();
//! daemon.start_all().await?;
//! daemon.wait_for_non_stale(std::time::Duration::from_secs(5)).await?;
//! daemon.stop_all().await;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod prelude;

// Re-export core types
pub use strand_core::{
    config::{BackoffStrategy, DaemonConfig, SqliteConfig, SynchronousMode},
    error::{Result, StrandError},
    memory::{InMemoryDeadLetterStore, InMemoryEventStore, InMemoryProgressionStore},
    traits::{DeadLetterStore, EventQuery, EventStore, ProgressionStore, Projection},
    types::{
        DeadLetterRecord, Event, EventPage, EventTypeFilter, NewEvent, ProjectionCheckpoint,
        Sequence,
    },
};

// Re-export implementations
pub use strand_daemon::{
    Blocking, BlockingProjection, DispatchTable, ErrorMatcher, ErrorRule, EventHandler,
    ExceptionPolicy, FaultHandler, HandlerProjection, PageBounds, PageFetcher, PolicyAction,
    ProjectionDaemon, ProjectionDaemonBuilder, ProjectionOptions, ShardFault, ShardState,
    ShardStatus, StopSignal, TerminalAction,
};
pub use strand_sqlite::SqliteStore;

// Re-export main types from this crate
pub use db::StrandDb;

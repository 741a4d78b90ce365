//! Strand Daemon: asynchronous projection processing
//!
//! Reads events from the log in strict global order and feeds them, page by
//! page, to independently progressing projections.
//!
//! Key features:
//! - One task per projection (shard) with its own fetch/apply/checkpoint loop
//! - Leading-edge buffer so recently committed events are never skipped
//! - Per-error-type retry policies with skip, stop-shard and stop-all outcomes
//! - Cooperative shutdown that never interrupts an in-flight apply
//! - Rebuilds and catch-up waits for hosts and tests

pub mod adapters;
pub mod daemon;
pub mod dispatch;
pub mod fetcher;
pub mod policy;
mod shard;
pub mod signal;
pub mod status;

pub use adapters::{Blocking, BlockingProjection, EventHandler, HandlerProjection};
pub use daemon::{ProjectionDaemon, ProjectionDaemonBuilder, ProjectionOptions};
pub use dispatch::DispatchTable;
pub use fetcher::PageFetcher;
pub use policy::{ErrorMatcher, ErrorRule, ExceptionPolicy, PolicyAction, TerminalAction};
pub use signal::StopSignal;
pub use status::{FaultHandler, PageBounds, ShardFault, ShardState, ShardStatus};

//! Strand Prelude
//!
//! Import this to get all commonly used types and traits:
//!
//! ```
//! use strand::prelude::*;
//! ```

// Core types
pub use crate::{
    Event, EventPage, EventTypeFilter, NewEvent, Result, Sequence, StrandDb, StrandError,
};

// Configs
pub use crate::{BackoffStrategy, DaemonConfig, SqliteConfig, SynchronousMode};

// Traits
pub use crate::{BlockingProjection, EventHandler, EventStore, ProgressionStore, Projection};

// Daemon
pub use crate::{
    ProjectionDaemon, ProjectionDaemonBuilder, ProjectionOptions, ShardFault, ShardState,
    ShardStatus,
};

// Exception policies
pub use crate::{ErrorRule, ExceptionPolicy, TerminalAction};

// Adapters
pub use crate::{Blocking, HandlerProjection};

// Re-export common external deps
pub use anyhow;
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use std::sync::Arc;
pub use tracing;

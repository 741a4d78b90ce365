//! Strand Core: Traits and types for the strand projection subsystem
//!
//! This crate defines the abstractions shared by every strand component:
//! - Event store: append-only, globally ordered event log (read side)
//! - Progression store: durable per-projection checkpoints
//! - Projection: user-supplied read model fed by pages of events
//! - Dead-letter store: record of pages skipped under the exception policy
//!
//! Key guarantees:
//! - Global sequences are strictly increasing and never reused
//! - A checkpoint only ever moves forward
//! - A page is applied as a unit; checkpoints never land mid-page

pub mod config;
pub mod error;
pub mod memory;
pub mod observe;
pub mod traits;
pub mod types;

pub use config::{BackoffStrategy, DaemonConfig, SqliteConfig, SynchronousMode};
pub use error::{Result, StrandError};
pub use memory::{InMemoryDeadLetterStore, InMemoryEventStore, InMemoryProgressionStore};
pub use traits::{DeadLetterStore, EventQuery, EventStore, ProgressionStore, Projection};
pub use types::{
    DeadLetterRecord, Event, EventPage, EventTypeFilter, NewEvent, ProjectionCheckpoint, Sequence,
};

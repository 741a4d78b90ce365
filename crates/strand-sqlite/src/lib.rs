//! SQLite-backed stores for strand
//!
//! A single database file holds the event log, projection checkpoints and
//! dead-lettered pages.
//!
//! Key features:
//! - `AUTOINCREMENT` global sequences, never reused
//! - Per-stream sequence numbers with a uniqueness constraint
//! - Monotonic checkpoint upserts
//! - WAL mode for concurrent readers

pub mod dead_letter;
pub mod progression;
pub mod schema;
pub mod store;

pub use store::SqliteStore;

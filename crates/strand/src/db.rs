//! Unified strand database interface
//!
//! Opens the SQLite event log, which also serves as the progression and
//! dead-letter store, and hands out daemon builders wired to it.

use crate::{
    Event, NewEvent, ProjectionDaemon, ProjectionDaemonBuilder, Result, SqliteConfig, SqliteStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Event log plus checkpoint storage in one SQLite file
pub struct StrandDb {
    store: Arc<SqliteStore>,
    base_path: PathBuf,
}

impl StrandDb {
    /// Open a strand database at the given directory
    ///
    /// The database lives at `{path}/strand.db`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        let config = SqliteConfig::new(base_path.join("strand.db"));
        Self::open_with_config(base_path, config)
    }

    /// Open with a custom SQLite configuration
    pub fn open_with_config(base_path: PathBuf, config: SqliteConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(config)?);
        tracing::info!("Opened strand database at {}", base_path.display());
        Ok(Self { store, base_path })
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Append events to a stream
    pub async fn append(&self, stream_id: &str, events: Vec<NewEvent>) -> Result<Vec<Event>> {
        self.store.append(stream_id, events).await
    }

    /// Daemon builder reading from this log and checkpointing into it
    ///
    /// Skipped pages are recorded in the database's dead-letter table.
    pub fn daemon_builder(&self) -> ProjectionDaemonBuilder {
        ProjectionDaemon::builder(self.store.clone(), self.store.clone())
            .with_dead_letters(self.store.clone())
    }
}

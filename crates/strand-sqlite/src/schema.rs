use rusqlite::Connection;
use strand_core::error::{Result, StrandError};

/// Current schema version written to `strand_meta`
pub const SCHEMA_VERSION: u32 = 1;

pub(crate) fn store_err(e: rusqlite::Error) -> StrandError {
    StrandError::Store(e.to_string())
}

/// Create all tables and indexes if they do not exist yet
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS strand_meta (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            schema_version INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS strand_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            stream_id TEXT NOT NULL,
            stream_seq INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            data TEXT NOT NULL,
            committed_at TEXT NOT NULL,
            UNIQUE (stream_id, stream_seq)
        );

        CREATE INDEX IF NOT EXISTS idx_strand_events_type
            ON strand_events (event_type, seq);

        CREATE INDEX IF NOT EXISTS idx_strand_events_committed_at
            ON strand_events (committed_at);

        CREATE TABLE IF NOT EXISTS strand_progression (
            name TEXT PRIMARY KEY,
            last_seq INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS strand_dead_letters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            projection TEXT NOT NULL,
            floor_seq INTEGER NOT NULL,
            ceiling_seq INTEGER NOT NULL,
            sequences TEXT NOT NULL,
            error_message TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            failed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_strand_dead_letters_projection
            ON strand_dead_letters (projection, id);",
    )
    .map_err(store_err)?;

    conn.execute(
        "INSERT OR IGNORE INTO strand_meta (id, schema_version) VALUES (0, ?1)",
        [SCHEMA_VERSION as i64],
    )
    .map_err(store_err)?;

    let version = schema_version(conn)?;
    if version > SCHEMA_VERSION {
        return Err(StrandError::InvalidState(format!(
            "Database schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Schema version recorded in the database
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn
        .query_row(
            "SELECT schema_version FROM strand_meta WHERE id = 0",
            [],
            |row| row.get(0),
        )
        .map_err(store_err)?;
    Ok(version as u32)
}

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::sync::Arc;
use strand_core::{
    error::{Result, StrandError},
    traits::{EventQuery, EventStore},
    types::{Event, NewEvent, Sequence},
    SqliteConfig,
};

use crate::schema::{self, store_err};

/// SQLite-backed event log, progression store and dead-letter store
///
/// All three share one connection. Store calls run on the blocking thread
/// pool so they never stall the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    config: SqliteConfig,
}

impl SqliteStore {
    /// Open (or create) a store at the configured path
    pub fn open(config: SqliteConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(store_err)?;

        Self::configure_connection(&conn, &config)?;
        schema::init_schema(&conn)?;

        tracing::debug!("Opened SQLite store at {}", config.path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config: SqliteConfig::new(":memory:".into()),
        })
    }

    fn configure_connection(conn: &Connection, cfg: &SqliteConfig) -> Result<()> {
        if cfg.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| StrandError::Config(e.to_string()))?;
        }

        conn.pragma_update(None, "synchronous", cfg.synchronous.as_pragma())
            .map_err(|e| StrandError::Config(e.to_string()))?;

        conn.busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms))
            .map_err(|e| StrandError::Config(e.to_string()))?;

        Ok(())
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Run a closure against the connection on the blocking thread pool
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| StrandError::Internal(format!("Task join error: {}", e)))?
    }

    /// Append events to a stream, committed now
    pub async fn append(&self, stream_id: &str, events: Vec<NewEvent>) -> Result<Vec<Event>> {
        self.append_at(stream_id, events, Utc::now()).await
    }

    /// Append events to a stream with an explicit commit timestamp
    ///
    /// All events are written in one transaction and receive consecutive
    /// global sequences.
    pub async fn append_at(
        &self,
        stream_id: &str,
        events: Vec<NewEvent>,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let stream_id = stream_id.to_string();
        self.with_conn(move |conn| append_blocking(conn, &stream_id, events, timestamp))
            .await
    }

    /// Every event of one stream in stream order
    pub async fn read_stream(&self, stream_id: &str) -> Result<Vec<Event>> {
        let stream_id = stream_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT seq, stream_id, stream_seq, event_type, data, committed_at
                     FROM strand_events
                     WHERE stream_id = ?1
                     ORDER BY stream_seq ASC",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map([&stream_id], read_event_row)
                .map_err(store_err)?;
            collect_events(rows)
        })
        .await
    }
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    // Fixed precision keeps lexicographic order equal to time order
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn append_blocking(
    conn: &Connection,
    stream_id: &str,
    events: Vec<NewEvent>,
    timestamp: DateTime<Utc>,
) -> Result<Vec<Event>> {
    let tx = conn.unchecked_transaction().map_err(store_err)?;
    let committed_at = format_timestamp(&timestamp);

    let mut stream_seq: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(stream_seq), 0) FROM strand_events WHERE stream_id = ?1",
            [stream_id],
            |row| row.get(0),
        )
        .map_err(store_err)?;

    let mut appended = Vec::with_capacity(events.len());
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO strand_events (stream_id, stream_seq, event_type, data, committed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(store_err)?;

        for new_event in events {
            stream_seq += 1;
            let data = serde_json::to_string(&new_event.data)?;
            stmt.execute(params![
                stream_id,
                stream_seq,
                new_event.event_type,
                data,
                committed_at
            ])
            .map_err(store_err)?;

            appended.push(Event {
                sequence: tx.last_insert_rowid() as Sequence,
                stream_id: stream_id.to_string(),
                stream_sequence: stream_seq as u64,
                event_type: new_event.event_type,
                data: new_event.data,
                timestamp,
            });
        }
    }

    tx.commit().map_err(store_err)?;
    Ok(appended)
}

type RawEvent = (i64, String, i64, String, String, String);

fn read_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_event(raw: RawEvent) -> Result<Event> {
    let (seq, stream_id, stream_seq, event_type, data, committed_at) = raw;
    let timestamp = DateTime::parse_from_rfc3339(&committed_at)
        .map_err(|e| StrandError::Serialization(format!("event {}: {}", seq, e)))?
        .with_timezone(&Utc);
    Ok(Event {
        sequence: seq as Sequence,
        stream_id,
        stream_sequence: stream_seq as u64,
        event_type,
        data: serde_json::from_str(&data)?,
        timestamp,
    })
}

fn collect_events<I>(rows: I) -> Result<Vec<Event>>
where
    I: Iterator<Item = rusqlite::Result<RawEvent>>,
{
    rows.map(|row| decode_event(row.map_err(store_err)?))
        .collect()
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let mut sql = String::from(
                "SELECT seq, stream_id, stream_seq, event_type, data, committed_at
                 FROM strand_events
                 WHERE seq > ?1 AND seq <= ?2",
            );
            let mut values: Vec<Value> = vec![
                Value::Integer(query.after as i64),
                Value::Integer(query.up_to as i64),
            ];

            if let Some(types) = query.filter.types() {
                if types.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders: Vec<String> = (0..types.len())
                    .map(|i| format!("?{}", values.len() + i + 1))
                    .collect();
                sql.push_str(&format!(
                    " AND event_type IN ({})",
                    placeholders.join(", ")
                ));
                values.extend(types.iter().map(|t| Value::Text(t.clone())));
            }

            sql.push_str(&format!(" ORDER BY seq ASC LIMIT ?{}", values.len() + 1));
            values.push(Value::Integer(query.limit as i64));

            let mut stmt = conn.prepare(&sql).map_err(store_err)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(values), read_event_row)
                .map_err(store_err)?;
            collect_events(rows)
        })
        .await
    }

    async fn current_max_sequence(&self) -> Result<Sequence> {
        self.with_conn(|conn| {
            let max: i64 = conn
                .query_row("SELECT COALESCE(MAX(seq), 0) FROM strand_events", [], |row| {
                    row.get(0)
                })
                .map_err(store_err)?;
            Ok(max as Sequence)
        })
        .await
    }

    async fn high_water_mark(&self, committed_before: DateTime<Utc>) -> Result<Sequence> {
        let cutoff = format_timestamp(&committed_before);
        self.with_conn(move |conn| {
            let first_unsafe: Option<i64> = conn
                .query_row(
                    "SELECT MIN(seq) FROM strand_events WHERE committed_at > ?1",
                    [&cutoff],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()
                .map_err(store_err)?
                .flatten();

            match first_unsafe {
                Some(seq) => Ok((seq - 1) as Sequence),
                None => {
                    let max: i64 = conn
                        .query_row("SELECT COALESCE(MAX(seq), 0) FROM strand_events", [], |row| {
                            row.get(0)
                        })
                        .map_err(store_err)?;
                    Ok(max as Sequence)
                }
            }
        })
        .await
    }
}

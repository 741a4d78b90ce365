use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use strand_core::{
    error::{Result, StrandError},
    traits::DeadLetterStore,
    types::DeadLetterRecord,
};

use crate::schema::store_err;
use crate::store::SqliteStore;

#[async_trait]
impl DeadLetterStore for SqliteStore {
    async fn record(&self, record: &DeadLetterRecord) -> Result<i64> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let sequences = serde_json::to_string(&record.sequences)?;
            conn.execute(
                "INSERT INTO strand_dead_letters
                    (projection, floor_seq, ceiling_seq, sequences, error_message, attempts, failed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.projection,
                    record.floor as i64,
                    record.ceiling as i64,
                    sequences,
                    record.error_message,
                    record.attempts,
                    record.failed_at.to_rfc3339(),
                ],
            )
            .map_err(store_err)?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn list(&self, projection: &str, limit: usize) -> Result<Vec<DeadLetterRecord>> {
        let name = projection.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT projection, floor_seq, ceiling_seq, sequences, error_message, attempts, failed_at
                     FROM strand_dead_letters
                     WHERE projection = ?1
                     ORDER BY id ASC
                     LIMIT ?2",
                )
                .map_err(store_err)?;

            let rows = stmt
                .query_map(params![name, limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })
                .map_err(store_err)?;

            let mut records = Vec::new();
            for row in rows {
                let (projection, floor, ceiling, sequences, error_message, attempts, failed_at) =
                    row.map_err(store_err)?;
                let failed_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&failed_at)
                    .map_err(|e| StrandError::Serialization(e.to_string()))?
                    .with_timezone(&Utc);
                records.push(DeadLetterRecord {
                    projection,
                    floor: floor as u64,
                    ceiling: ceiling as u64,
                    sequences: serde_json::from_str(&sequences)?,
                    error_message,
                    attempts,
                    failed_at,
                });
            }
            Ok(records)
        })
        .await
    }
}

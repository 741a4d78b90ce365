use async_trait::async_trait;
use rusqlite::OptionalExtension;
use strand_core::{
    error::Result,
    traits::ProgressionStore,
    types::{ProjectionCheckpoint, Sequence},
};

use crate::schema::store_err;
use crate::store::SqliteStore;

#[async_trait]
impl ProgressionStore for SqliteStore {
    async fn get_checkpoint(&self, projection: &str) -> Result<Sequence> {
        let name = projection.to_string();
        self.with_conn(move |conn| {
            let seq: Option<i64> = conn
                .query_row(
                    "SELECT last_seq FROM strand_progression WHERE name = ?1",
                    [&name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err)?;
            Ok(seq.unwrap_or(0) as Sequence)
        })
        .await
    }

    async fn set_checkpoint(&self, projection: &str, sequence: Sequence) -> Result<()> {
        let name = projection.to_string();
        self.with_conn(move |conn| {
            // The WHERE clause keeps checkpoints monotonic
            conn.execute(
                "INSERT INTO strand_progression (name, last_seq) VALUES (?1, ?2)
                 ON CONFLICT (name) DO UPDATE
                 SET last_seq = excluded.last_seq, updated_at = datetime('now')
                 WHERE excluded.last_seq > strand_progression.last_seq",
                rusqlite::params![name, sequence as i64],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn reset_checkpoint(&self, projection: &str) -> Result<()> {
        let name = projection.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM strand_progression WHERE name = ?1", [&name])
                .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn list_checkpoints(&self) -> Result<Vec<ProjectionCheckpoint>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name, last_seq FROM strand_progression ORDER BY name ASC")
                .map_err(store_err)?;
            let rows = stmt
                .query_map([], |row| {
                    let name: String = row.get(0)?;
                    let seq: i64 = row.get(1)?;
                    Ok(ProjectionCheckpoint::new(name, seq as Sequence))
                })
                .map_err(store_err)?;
            rows.map(|r| r.map_err(store_err)).collect()
        })
        .await
    }
}

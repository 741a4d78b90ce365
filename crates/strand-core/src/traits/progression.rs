use crate::error::Result;
use crate::types::{ProjectionCheckpoint, Sequence};
use async_trait::async_trait;

/// Progression store: durable mapping from projection name to checkpoint
///
/// Each shard writes only its own row, so no cross-shard locking is needed.
#[async_trait]
pub trait ProgressionStore: Send + Sync {
    /// Last applied sequence for a projection (0 when absent)
    async fn get_checkpoint(&self, projection: &str) -> Result<Sequence>;

    /// Record a new checkpoint.
    ///
    /// Implementations must never move a checkpoint backwards; a lower value
    /// than the stored one is ignored.
    async fn set_checkpoint(&self, projection: &str, sequence: Sequence) -> Result<()>;

    /// Delete a checkpoint so the projection replays from the beginning
    async fn reset_checkpoint(&self, projection: &str) -> Result<()>;

    /// All stored checkpoints, ordered by projection name
    async fn list_checkpoints(&self) -> Result<Vec<ProjectionCheckpoint>>;
}

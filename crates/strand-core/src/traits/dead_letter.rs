use crate::error::Result;
use crate::types::DeadLetterRecord;
use async_trait::async_trait;

/// Storage for pages skipped under the exception policy
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Record a skipped page, returning its identifier
    async fn record(&self, record: &DeadLetterRecord) -> Result<i64>;

    /// Skipped pages for a projection, oldest first
    async fn list(&self, projection: &str, limit: usize) -> Result<Vec<DeadLetterRecord>>;
}

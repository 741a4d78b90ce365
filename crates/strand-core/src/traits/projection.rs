use crate::error::Result;
use crate::types::{EventPage, EventTypeFilter};
use async_trait::async_trait;

/// A read model fed by pages of events
///
/// # Re-delivery
///
/// `apply` may be invoked more than once with the same page: after a failed
/// attempt that the exception policy retries, and after a restart when the
/// previous run applied a page but stopped before its checkpoint was written.
/// Implementations must be idempotent for a page, or write their effects in a
/// way that makes repeated application harmless.
///
/// # Example
///
/// ```ignore
/// struct OrderCount {
///     total: AtomicU64,
/// }
///
/// #[async_trait]
/// impl Projection for OrderCount {
///     fn name(&self) -> &str { "order_count" }
///
///     fn consumes(&self) -> EventTypeFilter {
///         EventTypeFilter::only(["order_placed"])
///     }
///
///     async fn apply(&self, page: &EventPage) -> anyhow::Result<()> {
///         self.total.fetch_add(page.len() as u64, Ordering::SeqCst);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Projection: Send + Sync {
    /// Unique projection name; also the checkpoint key
    fn name(&self) -> &str;

    /// Event types delivered to this projection
    fn consumes(&self) -> EventTypeFilter;

    /// Preferred page size; `None` uses the daemon default
    fn page_size_hint(&self) -> Option<usize> {
        None
    }

    /// One-time setup run before the shard's first cycle
    async fn ensure_storage_exists(&self) -> Result<()> {
        Ok(())
    }

    /// Apply a page of events as one logical unit
    async fn apply(&self, page: &EventPage) -> anyhow::Result<()>;

    /// Drop persisted read-model state before a rebuild
    async fn teardown(&self) -> Result<()> {
        Ok(())
    }
}

//! Page fetching with a leading-edge buffer.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use strand_core::{
    EventPage, EventQuery, EventStore, EventTypeFilter, Result, Sequence, StrandError,
};

/// Reads pages of events above a checkpoint
///
/// Only events below the store's high water mark for `now - leading_edge_buffer`
/// are returned. Events that reserved a sequence but committed inside the
/// buffer window, and everything after them, are withheld until a later
/// fetch, so no page can skip ahead of an in-flight commit.
pub struct PageFetcher {
    store: Arc<dyn EventStore>,
    leading_edge_buffer: Duration,
}

impl PageFetcher {
    pub fn new(store: Arc<dyn EventStore>, leading_edge_buffer: Duration) -> Self {
        Self {
            store,
            leading_edge_buffer,
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn leading_edge_buffer(&self) -> Duration {
        self.leading_edge_buffer
    }

    /// Latest commit time eligible for a fetch started at `now`
    ///
    /// Fails with a configuration error when the buffer does not fit the
    /// timestamp range.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let buffer = chrono::Duration::from_std(self.leading_edge_buffer)
            .map_err(|e| StrandError::Config(format!("leading edge buffer: {}", e)))?;
        now.checked_sub_signed(buffer).ok_or_else(|| {
            StrandError::Config(format!(
                "leading edge buffer of {:?} is out of range",
                self.leading_edge_buffer
            ))
        })
    }

    /// Fetch the next page of consumed events strictly above `after`
    ///
    /// Returns an empty page when nothing eligible is available. Store
    /// failures are returned as-is; callers decide whether to retry.
    pub async fn fetch_next_page(
        &self,
        consumes: &EventTypeFilter,
        after: Sequence,
        page_size: usize,
    ) -> Result<EventPage> {
        if page_size == 0 {
            return Err(StrandError::Config("page size must be at least 1".into()));
        }

        let high_water = self.store.high_water_mark(self.cutoff(Utc::now())?).await?;

        if high_water <= after {
            return Ok(EventPage::empty(after, high_water));
        }

        let query = EventQuery {
            after,
            up_to: high_water,
            limit: page_size,
            filter: consumes.clone(),
        };
        let events = self.store.fetch_events(&query).await?;

        let mut previous = after;
        for event in &events {
            if event.sequence <= previous || event.sequence > high_water {
                return Err(StrandError::InvalidState(format!(
                    "event store returned sequence {} out of order (after {}, high water {})",
                    event.sequence, previous, high_water
                )));
            }
            previous = event.sequence;
        }

        tracing::trace!(
            after,
            high_water,
            fetched = events.len(),
            "Fetched page"
        );

        Ok(EventPage::new(after, events, high_water))
    }
}

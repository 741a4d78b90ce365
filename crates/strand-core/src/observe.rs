//! Optional metrics instrumentation for strand.
//!
//! When the `observe` feature is enabled, the daemon emits counters and
//! histograms via the [`metrics`] crate. A downstream application must
//! install a metrics recorder (e.g. `metrics-exporter-prometheus`) to collect
//! the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record a successfully applied page.
///
/// - `strand.shard.pages_applied_total` – counter with `projection` label
/// - `strand.shard.events_applied_total` – counter with `projection` label
/// - `strand.shard.apply_duration_seconds` – histogram with `projection` label
#[inline]
pub fn record_page_applied(projection: &str, events: usize, duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        let projection = projection.to_string();
        metrics::counter!("strand.shard.pages_applied_total", "projection" => projection.clone())
            .increment(1);
        metrics::counter!("strand.shard.events_applied_total", "projection" => projection.clone())
            .increment(events as u64);
        metrics::histogram!("strand.shard.apply_duration_seconds", "projection" => projection)
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (projection, events, duration);
    }
}

/// Record a retry scheduled by the exception policy.
///
/// - `strand.shard.retries_total` – counter with `projection` label
#[inline]
pub fn record_retry(projection: &str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("strand.shard.retries_total", "projection" => projection.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = projection;
    }
}

/// Record a page skipped under the `SkipEvent` terminal action.
///
/// - `strand.shard.skipped_pages_total` – counter with `projection` label
#[inline]
pub fn record_skipped_page(projection: &str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("strand.shard.skipped_pages_total", "projection" => projection.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = projection;
    }
}

/// Record a shard stopping because of a terminal action.
///
/// - `strand.shard.stops_total` – counter with `projection` and `action` labels
#[inline]
pub fn record_shard_stop(projection: &str, action: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!(
            "strand.shard.stops_total",
            "projection" => projection.to_string(),
            "action" => action
        )
        .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (projection, action);
    }
}

/// Record a transient store failure seen by a shard.
///
/// - `strand.store.transient_errors_total` – counter with `operation` label
#[inline]
pub fn record_store_error(operation: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("strand.store.transient_errors_total", "operation" => operation)
            .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = operation;
    }
}

//! Order summary projection
//!
//! Appends a few order events, runs the daemon until the projection has
//! caught up, then prints shard status.
//!
//! Run with: cargo run -p strand --example order_summary

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use strand::prelude::*;

#[derive(Debug, Deserialize)]
struct OrderPlaced {
    total: i64,
}

#[derive(Default)]
struct OrderSummary {
    orders: AtomicU64,
    revenue: AtomicI64,
}

struct SharedSummary(Arc<OrderSummary>);

#[async_trait]
impl Projection for SharedSummary {
    fn name(&self) -> &str {
        "order_summary"
    }

    fn consumes(&self) -> EventTypeFilter {
        EventTypeFilter::only(["order_placed"])
    }

    async fn apply(&self, page: &EventPage) -> anyhow::Result<()> {
        for event in &page.events {
            let order: OrderPlaced = event.decode()?;
            self.0.orders.fetch_add(1, Ordering::SeqCst);
            self.0.revenue.fetch_add(order.total, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("strand_daemon=debug,strand=info")
        .init();

    let temp_dir = tempfile::tempdir()?;
    let db = StrandDb::open(temp_dir.path())?;

    for i in 0..5 {
        let stream = format!("order-{}", i);
        db.append(
            &stream,
            vec![
                NewEvent::new("order_placed", serde_json::json!({ "total": 10 * (i + 1) })),
                NewEvent::new("order_shipped", serde_json::json!({})),
            ],
        )
        .await?;
    }

    let summary = Arc::new(OrderSummary::default());
    let daemon = db
        .daemon_builder()
        .with_config(
            DaemonConfig::default()
                .with_leading_edge_buffer(Duration::from_millis(100))
                .with_default_page_size(2),
        )
        .with_default_policy(
            ExceptionPolicy::new().rule(
                ErrorRule::on_any()
                    .retry(3, BackoffStrategy::default())
                    .then(TerminalAction::StopShard),
            ),
        )
        .on_fault(|fault| {
            tracing::error!(projection = %fault.projection, action = %fault.action, "Fault: {}", fault.error)
        })
        .register(SharedSummary(summary.clone()))
        .build();

    daemon.start_all().await?;
    daemon.wait_for_non_stale(Duration::from_secs(5)).await?;

    println!(
        "orders: {}, revenue: {}",
        summary.orders.load(Ordering::SeqCst),
        summary.revenue.load(Ordering::SeqCst)
    );
    for status in daemon.status() {
        println!(
            "{}: {} at {} ({} pages)",
            status.projection, status.state, status.last_sequence, status.pages_applied
        );
    }

    daemon.stop_all().await;
    Ok(())
}

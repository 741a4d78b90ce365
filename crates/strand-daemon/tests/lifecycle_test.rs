mod common;

use common::{events, wait_until, Harness, TestProjection};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use strand_core::{
    Event, EventPage, EventTypeFilter, ProgressionStore, Projection, StrandError,
};
use strand_daemon::{
    Blocking, BlockingProjection, EventHandler, HandlerProjection, ProjectionOptions, ShardState,
    TerminalAction,
};

#[tokio::test]
async fn test_start_all_rejects_invalid_configuration() {
    let harness = Harness::new();

    let empty = harness.builder().build();
    assert!(matches!(
        empty.start_all().await.unwrap_err(),
        StrandError::Config(_)
    ));

    let zero_page = harness
        .builder()
        .register_with(
            TestProjection::all("p"),
            ProjectionOptions::new().with_page_size(0),
        )
        .build();
    assert!(matches!(
        zero_page.start_all().await.unwrap_err(),
        StrandError::Config(_)
    ));

    let duplicate = harness
        .builder()
        .register(TestProjection::all("p"))
        .register(TestProjection::all("p"))
        .build();
    assert!(matches!(
        duplicate.start_all().await.unwrap_err(),
        StrandError::Config(_)
    ));

    let consumes_nothing = harness
        .builder()
        .register(TestProjection::new(
            "p",
            EventTypeFilter::only(Vec::<String>::new()),
        ))
        .build();
    assert!(matches!(
        consumes_nothing.start_all().await.unwrap_err(),
        StrandError::Config(_)
    ));

    // Nothing was started by the failed calls
    assert!(duplicate
        .status()
        .iter()
        .all(|s| s.state == ShardState::Idle && s.pages_applied == 0));
}

#[tokio::test]
async fn test_start_all_twice_is_rejected_while_running() {
    let harness = Harness::new();
    let daemon = harness.builder().register(TestProjection::all("p")).build();

    daemon.start_all().await.unwrap();
    assert!(matches!(
        daemon.start_all().await.unwrap_err(),
        StrandError::InvalidState(_)
    ));

    daemon.stop_all().await;
    daemon.start_all().await.unwrap();
    daemon.stop_all().await;
}

#[tokio::test]
async fn test_stop_and_start_single_shard() {
    let harness = Harness::new();
    harness.events.append("s", events("a", 3));

    let first = TestProjection::all("first").into_arc();
    let second = TestProjection::all("second").into_arc();
    let daemon = harness
        .builder()
        .register_arc(first.clone(), ProjectionOptions::default())
        .register_arc(second.clone(), ProjectionOptions::default())
        .build();

    daemon.start_all().await.unwrap();
    daemon
        .wait_for_non_stale(Duration::from_secs(2))
        .await
        .unwrap();

    daemon.stop_shard("first").await.unwrap();
    assert_eq!(
        daemon.shard_status("first").unwrap().state,
        ShardState::Stopped
    );

    harness.events.append("s", events("a", 2));
    assert!(wait_until(Duration::from_secs(2), || second.applied().len() == 5).await);
    assert_eq!(first.applied(), vec![1, 2, 3]);
    assert_eq!(daemon.lag("first").await.unwrap(), 2);

    daemon.start_shard("first").await.unwrap();
    daemon
        .wait_for_non_stale(Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(first.applied(), vec![1, 2, 3, 4, 5]);
    assert_eq!(daemon.lag("first").await.unwrap(), 0);

    assert!(matches!(
        daemon.start_shard("first").await.unwrap_err(),
        StrandError::InvalidState(_)
    ));
    assert!(matches!(
        daemon.stop_shard("missing").await.unwrap_err(),
        StrandError::NotFound(_)
    ));

    daemon.stop_all().await;
}

#[tokio::test]
async fn test_rebuild_replays_from_the_beginning() {
    let harness = Harness::new();
    harness.events.append("s", events("a", 7));

    let projection = TestProjection::all("p").with_page_size(3).into_arc();
    let daemon = harness
        .builder()
        .register_arc(projection.clone(), ProjectionOptions::default())
        .build();

    daemon.start_all().await.unwrap();
    daemon
        .wait_for_non_stale(Duration::from_secs(2))
        .await
        .unwrap();
    let calls_before = projection.calls().len();

    let checkpoint = daemon.rebuild("p").await.unwrap();
    assert_eq!(checkpoint, 7);
    assert_eq!(projection.teardowns(), 1);
    assert_eq!(projection.applied(), (1..=7).collect::<Vec<_>>());
    assert_eq!(projection.calls()[calls_before].0, 0);

    // The shard resumes following the log after the rebuild
    harness.events.append("s", events("a", 1));
    daemon
        .wait_for_non_stale(Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(projection.applied(), (1..=8).collect::<Vec<_>>());

    assert!(matches!(
        daemon.rebuild("missing").await.unwrap_err(),
        StrandError::NotFound(_)
    ));
    daemon.stop_all().await;
}

#[tokio::test]
async fn test_rebuild_without_running_daemon() {
    let harness = Harness::new();
    harness.events.append("s", events("a", 4));
    harness.progression.set_checkpoint("p", 4).await.unwrap();

    let projection = TestProjection::all("p").into_arc();
    let daemon = harness
        .builder()
        .register_arc(projection.clone(), ProjectionOptions::default())
        .build();

    assert_eq!(daemon.rebuild("p").await.unwrap(), 4);
    assert_eq!(projection.applied(), vec![1, 2, 3, 4]);
    assert_eq!(
        daemon.shard_status("p").unwrap().state,
        ShardState::Stopped
    );
}

#[tokio::test]
async fn test_failed_rebuild_keeps_checkpoint_and_resumes() {
    let harness = Harness::new();
    harness.events.append("s", events("a", 3));

    let projection = TestProjection::all("p").with_failing_teardown().into_arc();
    let daemon = harness
        .builder()
        .register_arc(projection.clone(), ProjectionOptions::default())
        .build();

    daemon.start_all().await.unwrap();
    daemon
        .wait_for_non_stale(Duration::from_secs(2))
        .await
        .unwrap();

    assert!(matches!(
        daemon.rebuild("p").await.unwrap_err(),
        StrandError::Store(_)
    ));
    assert_eq!(harness.progression.get_checkpoint("p").await.unwrap(), 3);
    assert_eq!(projection.teardowns(), 0);

    // The shard is back to following the log
    harness.events.append("s", events("a", 2));
    daemon
        .wait_for_non_stale(Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(projection.applied(), (1..=5).collect::<Vec<_>>());
    assert!(daemon.shard_status("p").unwrap().is_running());
    daemon.stop_all().await;
}

#[tokio::test]
async fn test_start_all_rejects_out_of_range_leading_edge_buffer() {
    let harness = Harness::new();
    harness.events.append("s", events("a", 2));

    let daemon = harness
        .builder()
        .with_config(
            common::fast_config().with_leading_edge_buffer(Duration::from_millis(u64::MAX)),
        )
        .register(TestProjection::all("p"))
        .build();

    assert!(matches!(
        daemon.start_all().await.unwrap_err(),
        StrandError::Config(_)
    ));
    assert_eq!(daemon.shard_status("p").unwrap().state, ShardState::Idle);
    assert!(matches!(
        daemon.start_shard("p").await.unwrap_err(),
        StrandError::InvalidState(_)
    ));
}

#[tokio::test]
async fn test_wait_for_non_stale_times_out() {
    let harness = Harness::new();
    harness.events.append("s", events("a", 2));

    let slow = TestProjection::all("slow")
        .with_apply_delay(Duration::from_millis(500))
        .into_arc();
    let daemon = harness
        .builder()
        .register_arc(slow.clone(), ProjectionOptions::default())
        .build();

    daemon.start_all().await.unwrap();
    let err = daemon
        .wait_for_non_stale(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, StrandError::Timeout(_)));
    daemon.stop_all().await;
}

#[tokio::test]
async fn test_setup_failure_faults_shard() {
    let harness = Harness::new();
    harness.events.append("s", events("a", 2));

    let broken = TestProjection::all("broken").with_failing_setup().into_arc();
    let healthy = TestProjection::all("healthy").into_arc();
    let daemon = harness
        .builder()
        .register_arc(broken.clone(), ProjectionOptions::default())
        .register_arc(healthy.clone(), ProjectionOptions::default())
        .build();

    daemon.start_all().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            daemon.shard_status("broken").map(|s| s.state) == Some(ShardState::Faulted)
                && healthy.applied().len() == 2
        })
        .await
    );

    assert!(broken.calls().is_empty());
    let faults = harness.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].projection, "broken");
    assert_eq!(faults[0].action, TerminalAction::StopShard);
    assert!(faults[0].error.contains("read model unavailable"));
    daemon.stop_all().await;
}

#[tokio::test]
async fn test_register_while_running_starts_shard() {
    let harness = Harness::new();
    harness.events.append("s", events("a", 3));
    harness.events.append("s", events("b", 1));

    let daemon = harness.builder().register(TestProjection::all("first")).build();
    daemon.start_all().await.unwrap();

    let late = TestProjection::new("late", EventTypeFilter::only(["b"])).into_arc();
    daemon
        .register_projection(late.clone(), ProjectionOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        daemon
            .register_projection(late.clone(), ProjectionOptions::default())
            .await
            .unwrap_err(),
        StrandError::Config(_)
    ));

    daemon
        .wait_for_non_stale(Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(late.applied(), vec![4]);

    assert_eq!(daemon.projections_for("b"), vec!["first", "late"]);
    assert_eq!(daemon.projections_for("a"), vec!["first"]);
    assert_eq!(daemon.status().len(), 2);
    daemon.stop_all().await;
}

struct Balance {
    total: Arc<Mutex<i64>>,
}

impl EventHandler for Balance {
    fn event_type(&self) -> &str {
        "deposit"
    }

    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let amount: i64 = event.decode()?;
        *self.total.lock() += amount;
        Ok(())
    }
}

struct PageCounter {
    pages: Arc<Mutex<Vec<usize>>>,
}

impl BlockingProjection for PageCounter {
    fn name(&self) -> &str {
        "page_counter"
    }

    fn consumes(&self) -> EventTypeFilter {
        EventTypeFilter::All
    }

    fn page_size_hint(&self) -> Option<usize> {
        Some(2)
    }

    fn apply(&self, page: &EventPage) -> anyhow::Result<()> {
        self.pages.lock().push(page.len());
        Ok(())
    }
}

#[tokio::test]
async fn test_adapters_run_under_the_daemon() {
    let harness = Harness::new();
    harness.events.append(
        "account-1",
        vec![
            strand_core::NewEvent::new("deposit", serde_json::json!(10)),
            strand_core::NewEvent::new("withdrawal", serde_json::json!(3)),
            strand_core::NewEvent::new("deposit", serde_json::json!(5)),
        ],
    );

    let total = Arc::new(Mutex::new(0));
    let pages = Arc::new(Mutex::new(Vec::new()));
    let balances = HandlerProjection::new("balances").with_handler(Balance {
        total: total.clone(),
    });
    assert_eq!(balances.consumes(), EventTypeFilter::only(["deposit"]));

    let daemon = harness
        .builder()
        .register(balances)
        .register(Blocking::new(PageCounter {
            pages: pages.clone(),
        }))
        .build();

    daemon.start_all().await.unwrap();
    daemon
        .wait_for_non_stale(Duration::from_secs(2))
        .await
        .unwrap();
    daemon.stop_all().await;

    assert_eq!(*total.lock(), 15);
    assert_eq!(*pages.lock(), vec![2, 1]);
    assert_eq!(
        harness.progression.get_checkpoint("balances").await.unwrap(),
        3
    );
}

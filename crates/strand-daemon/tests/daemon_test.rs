mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{events, wait_until, Harness, TestProjection};
use std::time::{Duration, Instant};
use strand_core::{EventStore, EventTypeFilter, ProgressionStore};
use strand_daemon::{ErrorRule, ExceptionPolicy, ProjectionOptions, ShardState, TerminalAction};

#[tokio::test]
async fn test_events_applied_in_order_without_gaps() {
    let harness = Harness::new();
    for _ in 0..5 {
        harness.events.append("s", events("a", 3));
        harness.events.append("s", events("b", 2));
    }
    let expected_a: Vec<u64> = (1..=25).filter(|seq| (seq - 1) % 5 < 3).collect();

    let only_a = TestProjection::new("only_a", EventTypeFilter::only(["a"]))
        .with_page_size(4)
        .into_arc();
    let everything = TestProjection::all("everything").with_page_size(7).into_arc();

    let daemon = harness
        .builder()
        .register_arc(only_a.clone(), ProjectionOptions::default())
        .register_arc(everything.clone(), ProjectionOptions::default())
        .build();

    daemon.start_all().await.unwrap();
    daemon
        .wait_for_non_stale(Duration::from_secs(5))
        .await
        .unwrap();
    daemon.stop_all().await;

    assert_eq!(only_a.applied(), expected_a);
    assert_eq!(everything.applied(), (1..=25).collect::<Vec<_>>());

    // Each page starts exactly where the previous one ended
    let mut previous_ceiling = 0;
    for (floor, sequences) in only_a.calls() {
        assert_eq!(floor, previous_ceiling);
        assert!(sequences.len() <= 4);
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        previous_ceiling = *sequences.last().unwrap();
    }

    assert_eq!(
        harness.progression.get_checkpoint("only_a").await.unwrap(),
        *expected_a.last().unwrap()
    );
    assert_eq!(
        harness.progression.get_checkpoint("everything").await.unwrap(),
        25
    );

    let history = harness.progression.history("everything");
    assert!(history.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_caught_up_shard_respects_cooldown() {
    let harness = Harness::new();
    // Nothing the projection consumes: every cycle fetches and finds an empty page
    harness.events.append("s", events("b", 3));

    let idle = TestProjection::new("idle", EventTypeFilter::only(["a"])).into_arc();
    let daemon = harness
        .builder()
        .with_config(common::fast_config().with_fetching_cooldown(Duration::from_millis(100)))
        .register_arc(idle.clone(), ProjectionOptions::default())
        .build();

    daemon.start_all().await.unwrap();
    daemon
        .wait_for_non_stale(Duration::from_secs(2))
        .await
        .unwrap();

    let window_start = Instant::now();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let window_end = Instant::now();
    daemon.stop_all().await;

    let in_window = harness
        .events
        .fetch_calls()
        .into_iter()
        .filter(|at| *at >= window_start && *at <= window_end)
        .count();
    assert!(in_window >= 2, "shard stopped polling: {} fetches", in_window);
    assert!(in_window <= 6, "cooldown not honored: {} fetches", in_window);

    assert!(idle.calls().is_empty());
    assert_eq!(harness.progression.get_checkpoint("idle").await.unwrap(), 0);
    assert_eq!(daemon.shard_status("idle").unwrap().processed_through, 3);
}

#[tokio::test]
async fn test_leading_edge_withholds_late_commit() {
    let harness = Harness::new();
    let old = Utc::now() - ChronoDuration::seconds(60);
    harness.events.append_at("s", events("a", 3), old);
    // Sequence 4 reserved early but committed just now
    harness.events.append("s", events("a", 1));
    harness.events.append_at("s", events("a", 2), old);

    let projection = TestProjection::all("p").into_arc();
    let daemon = harness
        .builder()
        .with_config(common::fast_config().with_leading_edge_buffer(Duration::from_millis(400)))
        .register_arc(projection.clone(), ProjectionOptions::default())
        .build();

    daemon.start_all().await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || projection.applied().len() == 3).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(projection.applied(), vec![1, 2, 3]);

    assert!(wait_until(Duration::from_secs(3), || projection.applied().len() == 6).await);
    daemon.stop_all().await;

    assert_eq!(projection.applied(), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(projection.calls()[0], (0, vec![1, 2, 3]));
}

#[tokio::test]
async fn test_shards_progress_independently() {
    let harness = Harness::new();
    harness.events.append("s", events("a", 10));

    let broken = TestProjection::all("broken")
        .with_behavior(|_, _| Err(common::FatalError.into()))
        .into_arc();
    let healthy = TestProjection::all("healthy").with_page_size(3).into_arc();

    let daemon = harness
        .builder()
        .with_default_policy(
            ExceptionPolicy::new().rule(ErrorRule::on_any().then(TerminalAction::StopShard)),
        )
        .register_arc(broken.clone(), ProjectionOptions::default())
        .register_arc(healthy.clone(), ProjectionOptions::default())
        .build();

    daemon.start_all().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(3), || {
            healthy.applied().len() == 10
                && daemon.shard_status("broken").map(|s| s.state) == Some(ShardState::Stopped)
        })
        .await
    );

    let broken_status = daemon.shard_status("broken").unwrap();
    assert_eq!(broken_status.last_sequence, 0);
    assert!(broken_status
        .last_error
        .as_deref()
        .unwrap()
        .contains("fatal failure"));
    assert_eq!(broken.calls().len(), 1);

    let healthy_status = daemon.shard_status("healthy").unwrap();
    assert!(healthy_status.is_running());
    assert_eq!(healthy_status.last_sequence, 10);

    let faults = harness.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].projection, "broken");
    assert_eq!(faults[0].action, TerminalAction::StopShard);
    assert_eq!((faults[0].floor, faults[0].ceiling), (0, 10));

    daemon.stop_all().await;
}

#[tokio::test]
async fn test_stop_during_apply_leaves_page_uncommitted() {
    let harness = Harness::new();
    harness.events.append("s", events("a", 10));

    let slow = TestProjection::all("slow")
        .with_page_size(5)
        .with_apply_delay(Duration::from_millis(200))
        .into_arc();
    let daemon = harness
        .builder()
        .register_arc(slow.clone(), ProjectionOptions::default())
        .build();

    daemon.start_all().await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || slow.calls().len() == 1).await);
    daemon.stop_all().await;

    // The in-flight apply ran to completion but its page was not checkpointed
    assert_eq!(slow.calls().len(), 1);
    assert_eq!(slow.applied(), vec![1, 2, 3, 4, 5]);
    assert_eq!(harness.progression.get_checkpoint("slow").await.unwrap(), 0);
    assert!(harness.progression.history("slow").is_empty());

    let status = daemon.shard_status("slow").unwrap();
    assert_eq!(status.state, ShardState::Stopped);
    assert_eq!(status.last_sequence, 0);
    assert_eq!(status.current_page, None);

    // A restart re-delivers the same page before moving on
    daemon.start_all().await.unwrap();
    daemon
        .wait_for_non_stale(Duration::from_secs(3))
        .await
        .unwrap();
    daemon.stop_all().await;

    let calls = slow.calls();
    assert_eq!(calls[1], (0, vec![1, 2, 3, 4, 5]));
    assert_eq!(calls[2], (5, vec![6, 7, 8, 9, 10]));
    assert_eq!(harness.progression.history("slow"), vec![5, 10]);
}

#[tokio::test]
async fn test_restart_resumes_after_checkpoint() {
    let harness = Harness::new();
    harness.events.append("s", events("a", 4));

    let first = TestProjection::all("p").into_arc();
    let daemon = harness
        .builder()
        .register_arc(first.clone(), ProjectionOptions::default())
        .build();
    daemon.start_all().await.unwrap();
    daemon
        .wait_for_non_stale(Duration::from_secs(2))
        .await
        .unwrap();
    daemon.stop_all().await;

    harness.events.append("s", events("a", 3));

    let second = TestProjection::all("p").into_arc();
    let daemon = harness
        .builder()
        .register_arc(second.clone(), ProjectionOptions::default())
        .build();
    daemon.start_all().await.unwrap();
    daemon
        .wait_for_non_stale(Duration::from_secs(2))
        .await
        .unwrap();
    daemon.stop_all().await;

    assert_eq!(first.applied(), vec![1, 2, 3, 4]);
    assert_eq!(second.applied(), vec![5, 6, 7]);
    assert_eq!(second.calls()[0].0, 4);
    assert_eq!(harness.events.current_max_sequence().await.unwrap(), 7);
}

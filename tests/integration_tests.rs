//! Integration tests for the queue-warden matchmaking queue
//!
//! These tests validate the entire system working together, including:
//! - Several instances ticking against one shared store and lock
//! - Queue ordering, soft leave, rejoin and expiry
//! - Team formation and the match handoff
//! - The HTTP queue API over a fully wired application state

mod fixtures;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fixtures::{join_request, player_id, ClusterOptions, TestCluster};
use futures::future::join_all;
use proptest::prelude::*;
use queue_warden::config::{AppConfig, StoreBackend};
use queue_warden::error::{as_matchmaking_error, MatchmakingError};
use queue_warden::matchmaking::TickOutcome;
use queue_warden::queue::QueueStore;
use queue_warden::service::{api, AppState};
use queue_warden::types::QueueEvent;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Active entries must carry positions exactly `1..=count` in join order
async fn assert_positions_contiguous(store: &dyn QueueStore) {
    let active = store.list_active_ordered_by_join_time().await.unwrap();
    let positions: Vec<u32> = active.iter().map(|e| e.position).collect();
    let expected: Vec<u32> = (1..=active.len() as u32).collect();
    assert_eq!(positions, expected);
    assert!(active
        .windows(2)
        .all(|pair| pair[0].order_key() < pair[1].order_key()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ticks_never_overlap() {
    let cluster = TestCluster::new(ClusterOptions {
        instances: 5,
        players: 30,
        handoff_delay: Duration::from_millis(50),
        lock_wait_bound: Duration::from_millis(10),
        ..ClusterOptions::default()
    });
    cluster.join_range(1, 30).await;

    let ticks = cluster.instances.iter().map(|instance| {
        let scheduler = instance.scheduler.clone();
        tokio::spawn(async move { scheduler.run_tick().await })
    });
    let outcomes: Vec<TickOutcome> = join_all(ticks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(cluster.probe.max_in_flight(), 1);
    let matched = outcomes
        .iter()
        .filter(|o| matches!(o, TickOutcome::Matched(_)))
        .count();
    assert!(matched >= 1);
    assert_eq!(
        cluster.store.size().await.unwrap(),
        30 - matched * 10
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_serialized_ticks_assign_each_player_once() {
    let cluster = TestCluster::new(ClusterOptions {
        instances: 4,
        players: 30,
        handoff_delay: Duration::from_millis(20),
        lock_wait_bound: Duration::from_secs(5),
        ..ClusterOptions::default()
    });
    cluster.join_range(1, 30).await;

    let ticks = cluster.instances.iter().map(|instance| {
        let scheduler = instance.scheduler.clone();
        tokio::spawn(async move { scheduler.run_tick().await })
    });
    let outcomes: Vec<TickOutcome> = join_all(ticks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    // Long enough waits let every instance tick in turn: three matches, then an empty queue
    assert_eq!(cluster.probe.max_in_flight(), 1);
    assert_eq!(cluster.probe.matches().len(), 3);
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, TickOutcome::InsufficientPlayers { active: 0, .. })));

    let identities = cluster.probe.matched_identities();
    let unique: HashSet<&String> = identities.iter().collect();
    assert_eq!(identities.len(), 30);
    assert_eq!(unique.len(), 30);
    assert_eq!(cluster.store.size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_alternating_split_of_ten_players() {
    let cluster = TestCluster::new(ClusterOptions::default());
    cluster.join_range(1, 10).await;

    let outcome = cluster.scheduler().run_tick().await.unwrap();
    let TickOutcome::Matched(report) = outcome else {
        panic!("expected a match");
    };

    let ids = |team: &[queue_warden::types::PlayerProfile]| -> Vec<String> {
        team.iter().map(|p| p.identity.clone()).collect()
    };
    let expected_a: Vec<String> = [1, 3, 5, 7, 9].into_iter().map(player_id).collect();
    let expected_b: Vec<String> = [2, 4, 6, 8, 10].into_iter().map(player_id).collect();
    assert_eq!(ids(&report.team_a), expected_a);
    assert_eq!(ids(&report.team_b), expected_b);
    assert_eq!(report.removed, 10);

    let matched_events = cluster
        .publisher
        .events()
        .into_iter()
        .filter(|event| matches!(event, QueueEvent::PlayerLeftQueue(_)))
        .count();
    assert_eq!(matched_events, 10);
}

#[tokio::test]
async fn test_below_threshold_tick_changes_nothing() {
    let cluster = TestCluster::new(ClusterOptions::default());
    cluster.join_range(1, 9).await;
    let before = cluster.store.list_active_ordered_by_join_time().await.unwrap();

    let outcome = cluster.scheduler().run_tick().await.unwrap();

    assert!(matches!(
        outcome,
        TickOutcome::InsufficientPlayers {
            active: 9,
            required: 10
        }
    ));
    let after = cluster.store.list_active_ordered_by_join_time().await.unwrap();
    assert_eq!(before, after);
    assert!(cluster.probe.matches().is_empty());
    assert!(cluster.lock.holder("matchmaking").is_none());
}

#[tokio::test]
async fn test_only_most_senior_players_are_selected() {
    let cluster = TestCluster::new(ClusterOptions::default());
    cluster.join_range(1, 13).await;

    cluster.scheduler().run_tick().await.unwrap();

    let status = cluster.coordinator().status(None).await.unwrap();
    let remaining: Vec<String> = status.entries.iter().map(|e| e.identity.clone()).collect();
    assert_eq!(remaining, vec![player_id(11), player_id(12), player_id(13)]);
    assert_positions_contiguous(cluster.store.as_ref()).await;
}

#[tokio::test]
async fn test_unresolvable_player_is_dropped_from_team() {
    let cluster = TestCluster::new(ClusterOptions::default());
    cluster.join_range(1, 10).await;
    cluster.directory.unregister(&player_id(4)).unwrap();

    let outcome = cluster.scheduler().run_tick().await.unwrap();
    let TickOutcome::Matched(report) = outcome else {
        panic!("expected a match");
    };

    assert_eq!(report.dropped, vec![player_id(4)]);
    assert_eq!(report.team_a.len(), 5);
    assert_eq!(report.team_b.len(), 4);
    // The dropped entry is removed along with the rest
    assert_eq!(cluster.store.size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_handoff_still_discards_selection() {
    let cluster = TestCluster::new(ClusterOptions::default());
    cluster.join_range(1, 12).await;
    cluster.probe.set_failing(true);

    let outcome = cluster.scheduler().run_tick().await.unwrap();
    let TickOutcome::Matched(report) = outcome else {
        panic!("expected the tick to select players");
    };

    assert!(report.match_handle.is_none());
    assert_eq!(report.removed, 10);
    assert_eq!(cluster.store.size().await.unwrap(), 2);
    assert!(cluster.lock.holder("matchmaking").is_none());
}

#[tokio::test]
async fn test_tick_fails_cleanly_when_store_is_down() {
    let cluster = TestCluster::new(ClusterOptions::default());
    cluster.join_range(1, 10).await;
    cluster.store.set_available(false);

    let error = cluster.scheduler().run_tick().await.unwrap_err();
    assert!(matches!(
        as_matchmaking_error(&error),
        Some(MatchmakingError::StoreUnavailable { .. })
    ));
    assert!(cluster.lock.holder("matchmaking").is_none());

    // Next tick retries once the store is back
    cluster.store.set_available(true);
    let outcome = cluster.scheduler().run_tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Matched(_)));
}

#[tokio::test]
async fn test_uniqueness_across_instances() {
    let cluster = TestCluster::new(ClusterOptions {
        instances: 3,
        ..ClusterOptions::default()
    });

    let joins = cluster
        .instances
        .iter()
        .map(|instance| instance.coordinator.join(join_request("p01")));
    let results = join_all(joins).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    for error in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            as_matchmaking_error(error),
            Some(MatchmakingError::AlreadyQueued { .. })
        ));
    }
    assert_eq!(cluster.store.size().await.unwrap(), 1);
}

#[tokio::test]
async fn test_rejoin_keeps_join_time() {
    let cluster = TestCluster::new(ClusterOptions::default());
    cluster.join_range(1, 3).await;
    let coordinator = cluster.coordinator();
    let original = cluster.store.get(&player_id(1)).await.unwrap().unwrap();

    assert!(coordinator.leave(&player_id(1)).await.unwrap());
    cluster.clock.advance(chrono::Duration::seconds(90));
    let response = coordinator.join(join_request(&player_id(1))).await.unwrap();

    assert_eq!(response.entry.joined_at, original.joined_at);
    assert_eq!(response.entry.position, 1);
    assert_positions_contiguous(cluster.store.as_ref()).await;
}

#[tokio::test]
async fn test_leave_of_unknown_identity_is_a_no_op() {
    let cluster = TestCluster::new(ClusterOptions::default());
    cluster.join_range(1, 2).await;
    let before = cluster.store.list_active_ordered_by_join_time().await.unwrap();
    let events_before = cluster.publisher.events().len();

    assert!(!cluster.coordinator().leave("nobody").await.unwrap());

    let after = cluster.store.list_active_ordered_by_join_time().await.unwrap();
    assert_eq!(before, after);
    assert_eq!(cluster.publisher.events().len(), events_before);
}

#[tokio::test]
async fn test_sweep_expires_old_entries_once() {
    let cluster = TestCluster::new(ClusterOptions::default());
    cluster.join_range(1, 3).await;
    cluster.clock.advance(chrono::Duration::minutes(9));
    cluster.join_range(4, 5).await;
    cluster.clock.advance(chrono::Duration::minutes(2));

    let expired = cluster.scheduler().run_sweep().await.unwrap();
    assert_eq!(expired, 3);

    let status = cluster.coordinator().status(None).await.unwrap();
    let remaining: Vec<String> = status.entries.iter().map(|e| e.identity.clone()).collect();
    assert_eq!(remaining, vec![player_id(4), player_id(5)]);
    assert_positions_contiguous(cluster.store.as_ref()).await;

    assert_eq!(cluster.scheduler().run_sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn test_http_queue_flow_over_app_state() {
    let mut config = AppConfig::default();
    config.store.backend = StoreBackend::Memory;
    config.amqp.enabled = false;
    config.matchmaking.team_size = 1;
    let state = Arc::new(AppState::new(config).await.unwrap());
    let app = api::router(state.coordinator());

    for identity in ["alice", "bob", "carol"] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/queue/join")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "identity": identity,
                            "region": "eune",
                            "skill_value": 900.0
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let outcome = state.scheduler().run_tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Matched(_)));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/queue/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let status: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(status["count"], 1);
    assert_eq!(status["entries"][0]["identity"], "carol");
    assert_eq!(status["entries"][0]["position"], 1);
}

#[derive(Debug, Clone)]
enum Op {
    Join(usize),
    Leave(usize),
    Sweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..=8).prop_map(Op::Join),
        2 => (1usize..=8).prop_map(Op::Leave),
        1 => Just(Op::Sweep),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_positions_stay_contiguous(ops in prop::collection::vec(op_strategy(), 1..25)) {
        tokio_test::block_on(async {
            let cluster = TestCluster::new(ClusterOptions {
                players: 8,
                ..ClusterOptions::default()
            });
            let coordinator = cluster.coordinator();

            for op in ops {
                match op {
                    // Duplicate joins are rejected; that is fine here
                    Op::Join(i) => {
                        let _ = coordinator.join(join_request(&player_id(i))).await;
                    }
                    Op::Leave(i) => {
                        coordinator.leave(&player_id(i)).await.unwrap();
                    }
                    Op::Sweep => {
                        cluster.clock.advance(chrono::Duration::minutes(4));
                        cluster.scheduler().run_sweep().await.unwrap();
                    }
                }
                cluster.clock.advance(chrono::Duration::milliseconds(5));
                assert_positions_contiguous(cluster.store.as_ref()).await;
            }
        });
    }
}

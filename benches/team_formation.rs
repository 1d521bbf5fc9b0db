//! Performance benchmarks for team formation and queue ticks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use queue_warden::amqp::NullEventPublisher;
use queue_warden::lock::InMemoryTickLock;
use queue_warden::matchmaking::{
    alternate, RecordingMatchCreation, SchedulerConfig, TickScheduler,
};
use queue_warden::players::OpenPlayerLookup;
use queue_warden::queue::{CoordinatorConfig, InMemoryQueueStore, QueueCoordinator};
use queue_warden::types::{JoinRequest, PlayerProfile, QueueEntry};
use std::sync::Arc;

fn join_request(identity: &str) -> JoinRequest {
    JoinRequest {
        identity: identity.to_string(),
        region: "euw".to_string(),
        skill_value: 1500.0,
        primary_role: None,
        secondary_role: None,
    }
}

fn create_bench_system() -> (Arc<QueueCoordinator>, TickScheduler) {
    let coordinator = Arc::new(QueueCoordinator::new(
        Arc::new(InMemoryQueueStore::default()),
        Arc::new(OpenPlayerLookup),
        Arc::new(NullEventPublisher),
        CoordinatorConfig::default(),
    ));
    let scheduler = TickScheduler::new(
        coordinator.clone(),
        Arc::new(InMemoryTickLock::new()),
        Arc::new(RecordingMatchCreation::new()),
        SchedulerConfig::default(),
    );
    (coordinator, scheduler)
}

fn bench_alternating_split(c: &mut Criterion) {
    let now = queue_warden::utils::current_timestamp();
    let pool: Vec<QueueEntry> = (0..10)
        .map(|i| {
            let id = format!("player_{}", i);
            QueueEntry::new(&join_request(&id), &PlayerProfile::new(id.clone(), id.clone()), now)
        })
        .collect();

    c.bench_function("alternate_10_players", |b| {
        b.iter(|| black_box(alternate(pool.clone())))
    });
}

fn bench_join_with_recompute(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("join_into_queue_of_50", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (coordinator, _) = create_bench_system();
                for i in 0..50 {
                    let _ = coordinator
                        .join(join_request(&format!("player_{}", i)))
                        .await;
                }
                black_box(coordinator.join(join_request("bench_player")).await)
            })
        })
    });
}

fn bench_full_tick(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("tick_forming_one_match", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (coordinator, scheduler) = create_bench_system();
                for i in 0..10 {
                    let _ = coordinator
                        .join(join_request(&format!("player_{}", i)))
                        .await;
                }
                black_box(scheduler.run_tick().await)
            })
        })
    });
}

criterion_group!(
    benches,
    bench_alternating_split,
    bench_join_with_recompute,
    bench_full_tick
);
criterion_main!(benches);

//! Test fixtures for integration testing
//!
//! A `TestCluster` is several coordinator/scheduler pairs sharing one store,
//! one tick lock and one player directory, which is how separate service
//! processes share Redis in production.

#![allow(dead_code)]

use async_trait::async_trait;
use queue_warden::amqp::publisher::MockEventPublisher;
use queue_warden::error::{MatchmakingError, Result};
use queue_warden::lock::InMemoryTickLock;
use queue_warden::matchmaking::{MatchCreation, SchedulerConfig, TickScheduler};
use queue_warden::players::InMemoryPlayerDirectory;
use queue_warden::queue::{CoordinatorConfig, InMemoryQueueStore, QueueCoordinator};
use queue_warden::types::{JoinRequest, MatchHandle, PlayerProfile, TeamSplit};
use queue_warden::utils::ManualClock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Match creation that records how many handoffs ever ran at the same time
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    failing: AtomicBool,
    matches: Mutex<Vec<TeamSplit<PlayerProfile>>>,
}

impl ConcurrencyProbe {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn matches(&self) -> Vec<TeamSplit<PlayerProfile>> {
        self.matches
            .lock()
            .map(|matches| matches.clone())
            .unwrap_or_default()
    }

    /// Every identity handed off, across all matches
    pub fn matched_identities(&self) -> Vec<String> {
        self.matches()
            .into_iter()
            .flat_map(|teams| teams.team_a.into_iter().chain(teams.team_b))
            .map(|profile| profile.identity)
            .collect()
    }
}

#[async_trait]
impl MatchCreation for ConcurrencyProbe {
    async fn create_match(&self, teams: TeamSplit<PlayerProfile>) -> Result<MatchHandle> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(MatchmakingError::HandoffFailed {
                message: "probe rejecting matches".to_string(),
            }
            .into());
        }

        if let Ok(mut matches) = self.matches.lock() {
            matches.push(teams);
        }
        Ok(MatchHandle {
            match_id: queue_warden::utils::generate_match_id(),
        })
    }
}

pub struct TestInstance {
    pub coordinator: Arc<QueueCoordinator>,
    pub scheduler: Arc<TickScheduler>,
}

pub struct TestCluster {
    pub instances: Vec<TestInstance>,
    pub store: Arc<InMemoryQueueStore>,
    pub lock: Arc<InMemoryTickLock>,
    pub directory: Arc<InMemoryPlayerDirectory>,
    pub publisher: Arc<MockEventPublisher>,
    pub probe: Arc<ConcurrencyProbe>,
    pub clock: Arc<ManualClock>,
}

pub struct ClusterOptions {
    pub instances: usize,
    pub players: usize,
    pub team_size: usize,
    pub handoff_delay: Duration,
    pub lock_wait_bound: Duration,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            instances: 1,
            players: 20,
            team_size: 5,
            handoff_delay: Duration::from_millis(0),
            lock_wait_bound: Duration::from_millis(100),
        }
    }
}

impl TestCluster {
    pub fn new(options: ClusterOptions) -> Self {
        let store = Arc::new(InMemoryQueueStore::default());
        let lock = Arc::new(InMemoryTickLock::new());
        let directory = Arc::new(InMemoryPlayerDirectory::with_profiles(
            (1..=options.players).map(|i| PlayerProfile::new(player_id(i), format!("Player {}", i))),
        ));
        let publisher = Arc::new(MockEventPublisher::new());
        let probe = Arc::new(ConcurrencyProbe::new(options.handoff_delay));
        let clock = Arc::new(ManualClock::default());

        let coordinator_config = CoordinatorConfig {
            team_size: options.team_size,
            ..CoordinatorConfig::default()
        };
        let scheduler_config = SchedulerConfig {
            team_size: options.team_size,
            lock_wait_bound: options.lock_wait_bound,
            ..SchedulerConfig::default()
        };

        let instances = (0..options.instances)
            .map(|_| {
                let coordinator = Arc::new(
                    QueueCoordinator::new(
                        store.clone(),
                        directory.clone(),
                        publisher.clone(),
                        coordinator_config.clone(),
                    )
                    .with_clock(clock.clone()),
                );
                let scheduler = Arc::new(TickScheduler::new(
                    coordinator.clone(),
                    lock.clone(),
                    probe.clone(),
                    scheduler_config.clone(),
                ));
                TestInstance {
                    coordinator,
                    scheduler,
                }
            })
            .collect();

        Self {
            instances,
            store,
            lock,
            directory,
            publisher,
            probe,
            clock,
        }
    }

    pub fn coordinator(&self) -> Arc<QueueCoordinator> {
        self.instances[0].coordinator.clone()
    }

    pub fn scheduler(&self) -> Arc<TickScheduler> {
        self.instances[0].scheduler.clone()
    }

    /// Join players `from..=to` one millisecond apart, round-robin over instances
    pub async fn join_range(&self, from: usize, to: usize) {
        for i in from..=to {
            let instance = &self.instances[i % self.instances.len()];
            instance
                .coordinator
                .join(join_request(&player_id(i)))
                .await
                .unwrap();
            self.clock.advance(chrono::Duration::milliseconds(1));
        }
    }
}

pub fn player_id(i: usize) -> String {
    format!("p{:02}", i)
}

pub fn join_request(identity: &str) -> JoinRequest {
    JoinRequest {
        identity: identity.to_string(),
        region: "na".to_string(),
        skill_value: 1500.0,
        primary_role: Some("jungle".to_string()),
        secondary_role: None,
    }
}

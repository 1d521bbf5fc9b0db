//! Periodic matchmaking tick and expiry sweep
//!
//! Every instance runs the same schedule. The tick lock makes sure only one
//! of them forms teams in any window; the expiry sweep runs without the lock
//! because its deletes are idempotent.
//!
//! One tick:
//! 1. take the lease (bounded wait), or skip the tick;
//! 2. stop if fewer than two teams' worth of players are active;
//! 3. take the most senior `2 × team_size` entries and alternate them into teams;
//! 4. resolve every selected identity, dropping the ones that no longer resolve;
//! 5. hand the teams to match creation;
//! 6. remove every selected entry, even when the handoff failed;
//! 7. release the lease.

use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::lock::TickLock;
use crate::matchmaking::handoff::MatchCreation;
use crate::matchmaking::teams::{AlternatingTeamFormation, TeamFormation};
use crate::metrics::MetricsCollector;
use crate::queue::QueueCoordinator;
use crate::types::{Identity, MatchHandle, PlayerProfile, QueueEntry, TeamSplit};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub team_size: usize,
    pub lock_name: String,
    pub lock_wait_bound: Duration,
    pub lock_hold_bound: Duration,
    pub tick_interval: Duration,
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&MatchmakingSettings::default())
    }
}

impl From<&MatchmakingSettings> for SchedulerConfig {
    fn from(settings: &MatchmakingSettings) -> Self {
        Self {
            team_size: settings.team_size,
            lock_name: settings.lock_name.clone(),
            lock_wait_bound: Duration::from_millis(settings.lock_wait_bound_ms),
            lock_hold_bound: Duration::from_millis(settings.lock_hold_bound_ms),
            tick_interval: Duration::from_secs(settings.tick_interval_seconds),
            sweep_interval: Duration::from_secs(settings.sweep_interval_seconds),
        }
    }
}

impl SchedulerConfig {
    /// Players required for one match
    pub fn players_per_match(&self) -> usize {
        self.team_size * 2
    }
}

/// What a tick that held the lock and found enough players did
#[derive(Debug, Clone)]
pub struct MatchReport {
    /// Entries taken from the head of the queue
    pub selected: usize,
    pub team_a: Vec<PlayerProfile>,
    pub team_b: Vec<PlayerProfile>,
    /// Selected identities that could not be resolved and were left out of the teams
    pub dropped: Vec<Identity>,
    /// `None` when match creation failed
    pub match_handle: Option<MatchHandle>,
    /// Entries actually deleted from the store
    pub removed: usize,
}

/// Result of one tick
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Another instance holds the lock
    LockUnavailable,
    /// Not enough active players; nothing was written
    InsufficientPlayers { active: usize, required: usize },
    Matched(MatchReport),
}

impl TickOutcome {
    /// Metric label for this outcome
    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::LockUnavailable => "lock_unavailable",
            TickOutcome::InsufficientPlayers { .. } => "insufficient_players",
            TickOutcome::Matched(_) => "matched",
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Drives the periodic tick and expiry sweep for one instance
pub struct TickScheduler {
    coordinator: Arc<QueueCoordinator>,
    tick_lock: Arc<dyn TickLock>,
    match_creation: Arc<dyn MatchCreation>,
    team_formation: Arc<dyn TeamFormation>,
    metrics_collector: Arc<MetricsCollector>,
    config: SchedulerConfig,
}

impl TickScheduler {
    pub fn new(
        coordinator: Arc<QueueCoordinator>,
        tick_lock: Arc<dyn TickLock>,
        match_creation: Arc<dyn MatchCreation>,
        config: SchedulerConfig,
    ) -> Self {
        let metrics_collector = coordinator.metrics();
        Self {
            coordinator,
            tick_lock,
            match_creation,
            team_formation: Arc::new(AlternatingTeamFormation),
            metrics_collector,
            config,
        }
    }

    pub fn with_team_formation(mut self, team_formation: Arc<dyn TeamFormation>) -> Self {
        self.team_formation = team_formation;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<QueueCoordinator> {
        self.coordinator.clone()
    }

    /// Run one matchmaking pass
    pub async fn run_tick(&self) -> Result<TickOutcome> {
        let start_time = Instant::now();

        let token = match self
            .tick_lock
            .try_acquire(
                &self.config.lock_name,
                self.config.lock_wait_bound,
                self.config.lock_hold_bound,
            )
            .await
        {
            Ok(token) => token,
            Err(e) => {
                self.metrics_collector
                    .record_tick_failure(start_time.elapsed());
                return Err(e);
            }
        };
        self.metrics_collector.record_lock_wait(start_time.elapsed());

        let Some(token) = token else {
            debug!(
                "{}",
                MatchmakingError::LockUnavailable {
                    name: self.config.lock_name.clone(),
                    wait_ms: self.config.lock_wait_bound.as_millis() as u64,
                }
            );
            let outcome = TickOutcome::LockUnavailable;
            self.metrics_collector
                .record_tick(&outcome, start_time.elapsed());
            return Ok(outcome);
        };

        // A panicking collaborator must not keep the lease until it expires
        let result = match AssertUnwindSafe(self.run_locked()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Matchmaking tick panicked while holding the lease: {}", message);
                Err(MatchmakingError::InternalError {
                    message: format!("tick panicked: {}", message),
                }
                .into())
            }
        };

        match self.tick_lock.release(&token).await {
            Ok(true) => debug!("Released lease '{}'", token.name),
            Ok(false) => warn!(
                "Lease '{}' expired before the tick finished (hold bound {:?})",
                token.name, token.hold_bound
            ),
            Err(e) => warn!("Failed to release lease '{}': {}", token.name, e),
        }

        match &result {
            Ok(outcome) => self
                .metrics_collector
                .record_tick(outcome, start_time.elapsed()),
            Err(_) => self
                .metrics_collector
                .record_tick_failure(start_time.elapsed()),
        }
        result
    }

    async fn run_locked(&self) -> Result<TickOutcome> {
        let required = self.config.players_per_match();
        let store = self.coordinator.store();

        let active = store.size().await?;
        if active < required {
            debug!(
                "Not enough players for a match - active: {}, required: {}",
                active, required
            );
            return Ok(TickOutcome::InsufficientPlayers { active, required });
        }

        let selected = store.range_oldest(required).await?;
        if selected.len() < required {
            // Someone left between the count and the read
            debug!(
                "Pool shrank before selection - selected: {}, required: {}",
                selected.len(),
                required
            );
            return Ok(TickOutcome::InsufficientPlayers {
                active: selected.len(),
                required,
            });
        }

        info!(
            "Forming match from {} most senior players (oldest joined {})",
            selected.len(),
            selected[0].joined_at
        );

        let split = self.team_formation.form_teams(selected.clone());
        let mut dropped = Vec::new();
        let team_a = self.resolve_team(&split.team_a, &mut dropped).await;
        let team_b = self.resolve_team(&split.team_b, &mut dropped).await;

        let match_handle = match self
            .match_creation
            .create_match(TeamSplit {
                team_a: team_a.clone(),
                team_b: team_b.clone(),
            })
            .await
        {
            Ok(handle) => {
                info!(
                    "Match {} created - team A: {}, team B: {}, dropped: {}",
                    handle.match_id,
                    team_a.len(),
                    team_b.len(),
                    dropped.len()
                );
                Some(handle)
            }
            Err(e) => {
                // Entries are still removed below; these players must queue again
                error!(
                    "Match creation failed for {} selected players: {}",
                    selected.len(),
                    e
                );
                None
            }
        };

        let removed = self.coordinator.remove_matched(&selected).await?;

        Ok(TickOutcome::Matched(MatchReport {
            selected: selected.len(),
            team_a,
            team_b,
            dropped,
            match_handle,
            removed,
        }))
    }

    async fn resolve_team(
        &self,
        members: &[QueueEntry],
        dropped: &mut Vec<Identity>,
    ) -> Vec<PlayerProfile> {
        let lookup = self.coordinator.lookup();
        let mut team = Vec::with_capacity(members.len());

        for entry in members {
            match lookup.by_summoner_identity(&entry.identity).await {
                Ok(Some(profile)) => team.push(profile),
                Ok(None) => {
                    warn!("Dropping '{}' from match: identity no longer resolves", entry.identity);
                    dropped.push(entry.identity.clone());
                }
                Err(e) => {
                    warn!("Dropping '{}' from match: lookup failed: {}", entry.identity, e);
                    dropped.push(entry.identity.clone());
                }
            }
        }
        team
    }

    /// Run one expiry sweep
    pub async fn run_sweep(&self) -> Result<usize> {
        self.coordinator.sweep_expired().await
    }

    /// Start the periodic tick. Each iteration runs in its own task so a
    /// panic inside one tick is contained and the schedule keeps going.
    pub fn start_tick_task(self: Arc<Self>, is_running: Arc<RwLock<bool>>) -> JoinHandle<()> {
        let period = self.config.tick_interval;
        info!("Starting matchmaking tick task ({:?} interval)", period);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while *is_running.read().await {
                ticker.tick().await;
                if !*is_running.read().await {
                    break;
                }

                let scheduler = Arc::clone(&self);
                match tokio::spawn(async move { scheduler.run_tick().await }).await {
                    Ok(Ok(TickOutcome::Matched(report))) => debug!(
                        "Tick matched - removed: {}, created: {}",
                        report.removed,
                        report.match_handle.is_some()
                    ),
                    Ok(Ok(outcome)) => debug!("Tick finished: {}", outcome.label()),
                    Ok(Err(e)) => warn!("Matchmaking tick failed: {}", e),
                    Err(e) => error!("Matchmaking tick panicked: {}", e),
                }
            }

            info!("Matchmaking tick task stopped");
        })
    }

    /// Start the periodic expiry sweep, isolated per iteration like the tick
    pub fn start_sweep_task(self: Arc<Self>, is_running: Arc<RwLock<bool>>) -> JoinHandle<()> {
        let period = self.config.sweep_interval;
        info!("Starting expiry sweep task ({:?} interval)", period);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while *is_running.read().await {
                ticker.tick().await;
                if !*is_running.read().await {
                    break;
                }

                let scheduler = Arc::clone(&self);
                match tokio::spawn(async move { scheduler.run_sweep().await }).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("Expiry sweep failed: {}", e),
                    Err(e) => error!("Expiry sweep panicked: {}", e),
                }
            }

            info!("Expiry sweep task stopped");
        })
    }
}

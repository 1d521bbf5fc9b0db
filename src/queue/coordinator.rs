//! Queue coordinator handling join, leave, status and expiry
//!
//! The coordinator owns no state of its own: queue membership lives in the
//! shared store, so any number of service instances can run a coordinator
//! against the same store. Positions are derived data and are rewritten by a
//! full recompute after every membership change.

use crate::amqp::messages::MessageUtils;
use crate::amqp::publisher::EventPublisher;
use crate::config::MatchmakingSettings;
use crate::error::{as_matchmaking_error, MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::players::PlayerLookup;
use crate::queue::store::QueueStore;
use crate::types::{
    JoinRequest, JoinResponse, LeaveReason, PlayerLeftQueue, PlayerQueued, QueueEntry, QueueStatus,
};
use crate::utils::{to_chrono, Clock, SystemClock};
use crate::wait_time::{MissingPlayersEstimator, WaitTimeConfig, WaitTimeEstimator};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Settings the coordinator needs from the matchmaking configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub team_size: usize,
    /// Active entries older than this are removed by the sweep
    pub queue_timeout: Duration,
    /// Upper bound on a single event publish
    pub publish_timeout: Duration,
    /// Wait estimate per player still missing from a full match
    pub seconds_per_missing_player: u64,
    /// Wait estimate once a full match is queued
    pub full_queue_wait_seconds: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&MatchmakingSettings::default())
    }
}

impl From<&MatchmakingSettings> for CoordinatorConfig {
    fn from(settings: &MatchmakingSettings) -> Self {
        Self {
            team_size: settings.team_size,
            queue_timeout: Duration::from_secs(settings.queue_timeout_seconds),
            publish_timeout: Duration::from_millis(settings.publish_timeout_ms),
            seconds_per_missing_player: settings.seconds_per_missing_player,
            full_queue_wait_seconds: settings.full_queue_wait_seconds,
        }
    }
}

/// Coordinates queue membership on top of a shared store
#[derive(Clone)]
pub struct QueueCoordinator {
    /// Shared ordered queue store
    store: Arc<dyn QueueStore>,
    /// Resolves identities to player profiles
    lookup: Arc<dyn PlayerLookup>,
    /// Event publisher for queue events
    event_publisher: Arc<dyn EventPublisher>,
    /// Advisory wait estimate for join responses
    wait_estimator: Arc<dyn WaitTimeEstimator>,
    /// Source of `joined_at` and the expiry cutoff
    clock: Arc<dyn Clock>,
    /// Metrics collector for recording queue traffic
    metrics_collector: Arc<MetricsCollector>,
    config: CoordinatorConfig,
}

impl QueueCoordinator {
    /// Create a new coordinator with its own metrics collector
    pub fn new(
        store: Arc<dyn QueueStore>,
        lookup: Arc<dyn PlayerLookup>,
        event_publisher: Arc<dyn EventPublisher>,
        config: CoordinatorConfig,
    ) -> Self {
        let metrics_collector = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(store, lookup, event_publisher, config, metrics_collector)
    }

    /// Create a new coordinator that records into a shared metrics collector
    pub fn with_metrics(
        store: Arc<dyn QueueStore>,
        lookup: Arc<dyn PlayerLookup>,
        event_publisher: Arc<dyn EventPublisher>,
        config: CoordinatorConfig,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        let wait_config = WaitTimeConfig {
            team_size: config.team_size,
            seconds_per_missing_player: config.seconds_per_missing_player,
            full_queue_wait_seconds: config.full_queue_wait_seconds,
        };

        Self {
            store,
            lookup,
            event_publisher,
            wait_estimator: Arc::new(MissingPlayersEstimator::new(wait_config).unwrap_or_default()),
            clock: Arc::new(SystemClock),
            metrics_collector,
            config,
        }
    }

    /// Replace the wall clock (tests and simulations)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_wait_estimator(mut self, estimator: Arc<dyn WaitTimeEstimator>) -> Self {
        self.wait_estimator = estimator;
        self
    }

    pub fn store(&self) -> Arc<dyn QueueStore> {
        self.store.clone()
    }

    pub fn lookup(&self) -> Arc<dyn PlayerLookup> {
        self.lookup.clone()
    }

    pub fn event_publisher(&self) -> Arc<dyn EventPublisher> {
        self.event_publisher.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Add a player to the queue, or reactivate a soft-left entry in place
    pub async fn join(&self, request: JoinRequest) -> Result<JoinResponse> {
        let start_time = Instant::now();

        info!(
            "Processing join - identity: '{}', region: '{}', skill: {:.1}",
            request.identity, request.region, request.skill_value
        );

        let result = self.join_inner(&request).await;

        let outcome = match &result {
            Ok((_, true)) => "rejoined",
            Ok((_, false)) => "joined",
            Err(e) => error_outcome(e),
        };
        self.metrics_collector
            .record_join(outcome, start_time.elapsed());

        let (response, _) = result?;
        self.metrics_collector
            .record_wait_estimate(response.estimated_wait_seconds);

        info!(
            "Join completed - identity: '{}', position: {}, estimated wait: {}s, outcome: {}",
            response.entry.identity,
            response.entry.position,
            response.estimated_wait_seconds,
            outcome
        );
        Ok(response)
    }

    async fn join_inner(&self, request: &JoinRequest) -> Result<(JoinResponse, bool)> {
        MessageUtils::validate_join_request(request)?;

        let existing = self.store.get(&request.identity).await?;
        if existing.as_ref().is_some_and(|entry| entry.active) {
            return Err(MatchmakingError::AlreadyQueued {
                identity: request.identity.clone(),
            }
            .into());
        }

        let profile = self
            .lookup
            .by_summoner_identity(&request.identity)
            .await?
            .ok_or_else(|| MatchmakingError::UnknownPlayer {
                identity: request.identity.clone(),
            })?;

        let mut rejoined = false;
        let mut entry = None;

        if let Some(mut previous) = existing {
            previous.reactivate(request, &profile);
            if self.store.replace(previous.clone()).await? {
                debug!(
                    "Reactivated '{}' keeping join time {}",
                    previous.identity, previous.joined_at
                );
                rejoined = true;
                entry = Some(previous);
            } else {
                // Expired or removed since the read; fall through to a fresh entry
                debug!(
                    "Inactive entry for '{}' vanished before reactivation",
                    request.identity
                );
            }
        }

        let mut entry = match entry {
            Some(entry) => entry,
            None => {
                let fresh = QueueEntry::new(request, &profile, self.clock.now());
                if !self.store.insert(fresh.clone()).await? {
                    // Another instance inserted the same identity concurrently
                    return Err(MatchmakingError::AlreadyQueued {
                        identity: request.identity.clone(),
                    }
                    .into());
                }
                fresh
            }
        };

        let active_count = match self.recompute_positions().await {
            Ok(active) => {
                if let Some(ranked) = active.iter().find(|e| e.identity == entry.identity) {
                    entry.position = ranked.position;
                }
                active.len()
            }
            Err(e) => {
                warn!(
                    "Position recompute after join of '{}' failed: {}",
                    entry.identity, e
                );
                self.store.size().await.unwrap_or(0)
            }
        };

        let estimated_wait_seconds = self.wait_estimator.estimate_wait_seconds(active_count);

        let event = PlayerQueued {
            identity: entry.identity.clone(),
            region: entry.region.clone(),
            position: entry.position,
            rejoined,
            timestamp: self.clock.now(),
        };
        self.publish("PlayerQueued", self.event_publisher.publish_player_queued(event))
            .await;

        Ok((
            JoinResponse {
                entry,
                estimated_wait_seconds,
                wait_estimate_advisory: true,
            },
            rejoined,
        ))
    }

    /// Soft leave: the entry stays in the store, inactive, so a rejoin keeps
    /// its seniority. Returns false, without mutating anything, when the
    /// identity is unknown or already inactive.
    pub async fn leave(&self, identity: &str) -> Result<bool> {
        let start_time = Instant::now();
        let result = self.leave_inner(identity).await;

        let outcome = match &result {
            Ok(true) => "removed",
            Ok(false) => "not_queued",
            Err(e) => error_outcome(e),
        };
        self.metrics_collector
            .record_leave(outcome, start_time.elapsed());

        if let Ok(removed) = &result {
            info!("Leave processed - identity: '{}', removed: {}", identity, removed);
        }
        result
    }

    async fn leave_inner(&self, identity: &str) -> Result<bool> {
        let mut entry = match self.store.get(identity).await? {
            Some(entry) if entry.active => entry,
            _ => {
                debug!("Leave for '{}' ignored: not actively queued", identity);
                return Ok(false);
            }
        };

        entry.active = false;
        entry.position = 0;
        if !self.store.replace(entry).await? {
            return Ok(false);
        }

        if let Err(e) = self.recompute_positions().await {
            warn!("Position recompute after leave of '{}' failed: {}", identity, e);
        }

        let event = PlayerLeftQueue {
            identity: identity.to_string(),
            reason: LeaveReason::PlayerLeft,
            timestamp: self.clock.now(),
        };
        self.publish("PlayerLeftQueue", self.event_publisher.publish_player_left(event))
            .await;

        Ok(true)
    }

    /// Snapshot of the active queue, in position order
    pub async fn status(&self, requester: Option<&str>) -> Result<QueueStatus> {
        let timer = self.metrics_collector.start_timer();
        let mut entries = self.store.list_active_ordered_by_join_time().await?;

        // Positions are derived; report them from this snapshot's ordering
        for (index, entry) in entries.iter_mut().enumerate() {
            entry.position = (index + 1) as u32;
        }

        let is_requester_queued =
            requester.is_some_and(|id| entries.iter().any(|entry| entry.identity == id));

        self.metrics_collector
            .record_queue_operation("status", timer.stop());

        Ok(QueueStatus {
            count: entries.len(),
            entries,
            is_requester_queued,
        })
    }

    /// Rewrite every active entry's position to its 1-based rank.
    ///
    /// Writes go through `replace`, so an entry removed concurrently is never
    /// brought back. Returns the ranked active entries.
    pub async fn recompute_positions(&self) -> Result<Vec<QueueEntry>> {
        let timer = self.metrics_collector.start_timer();
        let mut entries = self.store.list_active_ordered_by_join_time().await?;
        let mut rewritten = 0;

        for (index, entry) in entries.iter_mut().enumerate() {
            let position = (index + 1) as u32;
            if entry.position == position {
                continue;
            }
            entry.position = position;
            if self.store.replace(entry.clone()).await? {
                rewritten += 1;
            }
        }

        self.metrics_collector.set_active_entries(entries.len());
        self.metrics_collector
            .record_queue_operation("recompute_positions", timer.stop());
        debug!(
            "Recomputed positions - active: {}, rewritten: {}",
            entries.len(),
            rewritten
        );

        Ok(entries)
    }

    /// Remove the entries a tick handed to match creation
    pub async fn remove_matched(&self, entries: &[QueueEntry]) -> Result<usize> {
        let mut removed = 0;
        for entry in entries {
            if self.store.remove(&entry.identity).await? {
                removed += 1;
                let event = PlayerLeftQueue {
                    identity: entry.identity.clone(),
                    reason: LeaveReason::Matched,
                    timestamp: self.clock.now(),
                };
                self.publish("PlayerLeftQueue", self.event_publisher.publish_player_left(event))
                    .await;
            }
        }

        if let Err(e) = self.recompute_positions().await {
            warn!("Position recompute after match removal failed: {}", e);
        }
        Ok(removed)
    }

    /// Delete active entries that joined before `now - queue_timeout`.
    ///
    /// Needs no lock: removal is idempotent, so concurrent sweeps on several
    /// instances only race to delete the same keys.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let start_time = Instant::now();
        let cutoff = self.clock.now() - to_chrono(self.config.queue_timeout);
        let entries = self.store.list_active_ordered_by_join_time().await?;

        let mut expired = 0;
        // Ordered by join time, so everything past the first fresh entry is fresh too
        for entry in entries.iter().take_while(|entry| entry.joined_at < cutoff) {
            if self.store.remove(&entry.identity).await? {
                expired += 1;
                debug!(
                    "Expired '{}' (joined {}, cutoff {})",
                    entry.identity, entry.joined_at, cutoff
                );
                let event = PlayerLeftQueue {
                    identity: entry.identity.clone(),
                    reason: LeaveReason::Expired,
                    timestamp: self.clock.now(),
                };
                self.publish("PlayerLeftQueue", self.event_publisher.publish_player_left(event))
                    .await;
            }
        }

        if expired > 0 {
            self.recompute_positions().await?;
            info!("Expiry sweep removed {} entries", expired);
        } else {
            debug!("Expiry sweep found nothing older than {}", cutoff);
        }

        self.metrics_collector
            .record_sweep(expired, start_time.elapsed());
        Ok(expired)
    }

    /// Administrative wipe of the whole queue
    pub async fn clear_queue(&self) -> Result<usize> {
        let active = self.store.list_active_ordered_by_join_time().await?;
        let cleared = self.store.clear().await?;

        for entry in &active {
            let event = PlayerLeftQueue {
                identity: entry.identity.clone(),
                reason: LeaveReason::Cleared,
                timestamp: self.clock.now(),
            };
            self.publish("PlayerLeftQueue", self.event_publisher.publish_player_left(event))
                .await;
        }

        self.metrics_collector.record_clear(cleared);
        self.metrics_collector.set_active_entries(0);
        warn!("Queue cleared - {} entries removed", cleared);
        Ok(cleared)
    }

    /// Best-effort publish bounded by the publish timeout; failures are logged only
    pub(crate) async fn publish<F>(&self, event: &str, publish: F)
    where
        F: Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.config.publish_timeout, publish).await {
            Ok(Ok(())) => self.metrics_collector.record_event_published(event, true),
            Ok(Err(e)) => {
                warn!("Failed to publish {} event: {}", event, e);
                self.metrics_collector.record_event_published(event, false);
            }
            Err(_) => {
                warn!(
                    "Publishing {} event timed out after {:?}",
                    event, self.config.publish_timeout
                );
                self.metrics_collector.record_event_published(event, false);
            }
        }
    }
}

fn error_outcome(error: &anyhow::Error) -> &'static str {
    match as_matchmaking_error(error) {
        Some(MatchmakingError::AlreadyQueued { .. }) => "already_queued",
        Some(MatchmakingError::UnknownPlayer { .. }) => "unknown_player",
        Some(MatchmakingError::InvalidQueueRequest { .. }) => "invalid",
        Some(MatchmakingError::StoreUnavailable { .. }) => "store_unavailable",
        _ => "error",
    }
}

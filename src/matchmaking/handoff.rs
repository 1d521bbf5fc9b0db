//! Handoff of formed teams to match creation

use crate::amqp::publisher::EventPublisher;
use crate::error::{MatchmakingError, Result};
use crate::types::{MatchFormed, MatchHandle, PlayerProfile, TeamSplit};
use crate::utils::{current_timestamp, generate_match_id};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// External system that turns two teams into a match
#[async_trait]
pub trait MatchCreation: Send + Sync {
    async fn create_match(&self, teams: TeamSplit<PlayerProfile>) -> Result<MatchHandle>;
}

/// Match creation that assigns a match id and announces it as a
/// `match.formed` event for the game-session side to pick up
pub struct PublishingMatchCreation {
    event_publisher: Arc<dyn EventPublisher>,
    instance_id: String,
    publish_timeout: Duration,
}

impl PublishingMatchCreation {
    pub fn new(
        event_publisher: Arc<dyn EventPublisher>,
        instance_id: &str,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            event_publisher,
            instance_id: instance_id.to_string(),
            publish_timeout,
        }
    }
}

#[async_trait]
impl MatchCreation for PublishingMatchCreation {
    async fn create_match(&self, teams: TeamSplit<PlayerProfile>) -> Result<MatchHandle> {
        let handle = MatchHandle {
            match_id: generate_match_id(),
        };

        let event = MatchFormed {
            match_id: handle.match_id,
            team_a: teams.team_a,
            team_b: teams.team_b,
            formed_by: self.instance_id.clone(),
            timestamp: current_timestamp(),
        };

        match tokio::time::timeout(
            self.publish_timeout,
            self.event_publisher.publish_match_formed(event),
        )
        .await
        {
            Ok(Ok(())) => {
                info!("Match {} handed off", handle.match_id);
                Ok(handle)
            }
            Ok(Err(e)) => Err(MatchmakingError::HandoffFailed {
                message: format!("Failed to announce match {}: {}", handle.match_id, e),
            }
            .into()),
            Err(_) => Err(MatchmakingError::HandoffFailed {
                message: format!(
                    "Announcing match {} timed out after {:?}",
                    handle.match_id, self.publish_timeout
                ),
            }
            .into()),
        }
    }
}

/// Match formed through a [`RecordingMatchCreation`]
#[derive(Debug, Clone)]
pub struct RecordedMatch {
    pub handle: MatchHandle,
    pub teams: TeamSplit<PlayerProfile>,
}

/// Match creation that keeps every match in memory
#[derive(Debug, Default)]
pub struct RecordingMatchCreation {
    matches: Mutex<Vec<RecordedMatch>>,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl RecordingMatchCreation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold each handoff for `delay`, keeping the tick lock busy
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Reject every handoff until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn matches(&self) -> Vec<RecordedMatch> {
        self.matches
            .lock()
            .map(|matches| matches.clone())
            .unwrap_or_default()
    }

    pub fn match_count(&self) -> usize {
        self.matches.lock().map(|matches| matches.len()).unwrap_or(0)
    }
}

#[async_trait]
impl MatchCreation for RecordingMatchCreation {
    async fn create_match(&self, teams: TeamSplit<PlayerProfile>) -> Result<MatchHandle> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(MatchmakingError::HandoffFailed {
                message: "match creation rejected the teams".to_string(),
            }
            .into());
        }

        let handle = MatchHandle {
            match_id: generate_match_id(),
        };
        let mut matches = self
            .matches
            .lock()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire recorded matches lock".to_string(),
            })?;
        matches.push(RecordedMatch {
            handle: handle.clone(),
            teams,
        });
        Ok(handle)
    }
}

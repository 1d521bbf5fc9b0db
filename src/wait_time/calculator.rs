//! Estimated wait time for a joining player
//!
//! The estimate is advisory: it only looks at how many players are still
//! missing for one match, not at history or skill spread.

use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for wait time estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitTimeConfig {
    /// Players per team; a match needs twice this many
    pub team_size: usize,
    /// Seconds added per player still missing from a full match
    pub seconds_per_missing_player: u64,
    /// Flat estimate once enough players are queued
    pub full_queue_wait_seconds: u64,
}

impl Default for WaitTimeConfig {
    fn default() -> Self {
        Self {
            team_size: 5,
            seconds_per_missing_player: 30,
            full_queue_wait_seconds: 60,
        }
    }
}

impl From<&MatchmakingSettings> for WaitTimeConfig {
    fn from(settings: &MatchmakingSettings) -> Self {
        Self {
            team_size: settings.team_size,
            seconds_per_missing_player: settings.seconds_per_missing_player,
            full_queue_wait_seconds: settings.full_queue_wait_seconds,
        }
    }
}

impl WaitTimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.team_size == 0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "team_size must be greater than 0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Players required for one match
    pub fn players_per_match(&self) -> usize {
        self.team_size * 2
    }
}

/// Trait for estimating how long a newly queued player will wait
pub trait WaitTimeEstimator: Send + Sync {
    /// Estimate in seconds given the current active queue size
    fn estimate_wait_seconds(&self, active_count: usize) -> u64;
}

/// Estimator based on the number of players still missing for a match
#[derive(Debug, Clone, Default)]
pub struct MissingPlayersEstimator {
    config: WaitTimeConfig,
}

impl MissingPlayersEstimator {
    pub fn new(config: WaitTimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &WaitTimeConfig {
        &self.config
    }
}

impl WaitTimeEstimator for MissingPlayersEstimator {
    fn estimate_wait_seconds(&self, active_count: usize) -> u64 {
        let required = self.config.players_per_match();
        if active_count < required {
            (required - active_count) as u64 * self.config.seconds_per_missing_player
        } else {
            self.config.full_queue_wait_seconds
        }
    }
}

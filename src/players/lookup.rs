//! Player lookup interface and implementations
//!
//! Profiles (display name, rank) live in an external system. The queue only
//! needs to resolve an identity at join time and again at team handoff.

use crate::error::{MatchmakingError, Result};
use crate::types::PlayerProfile;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::info;

/// Trait for resolving a player identity to profile data
#[async_trait]
pub trait PlayerLookup: Send + Sync {
    /// `Ok(None)` means the identity is unknown; `Err` means the lookup itself failed
    async fn by_summoner_identity(&self, identity: &str) -> Result<Option<PlayerProfile>>;
}

/// Registry of known profiles held in memory
#[derive(Debug, Default)]
pub struct InMemoryPlayerDirectory {
    profiles: RwLock<HashMap<String, PlayerProfile>>,
}

impl InMemoryPlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from a list of profiles
    pub fn with_profiles(profiles: impl IntoIterator<Item = PlayerProfile>) -> Self {
        let directory = Self::new();
        if let Ok(mut map) = directory.profiles.write() {
            for profile in profiles {
                map.insert(profile.identity.clone(), profile);
            }
        }
        directory
    }

    /// Load a JSON array of profiles
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| MatchmakingError::ConfigurationError {
            message: format!("Failed to read profiles file {}: {}", path.display(), e),
        })?;
        let profiles: Vec<PlayerProfile> =
            serde_json::from_str(&raw).map_err(|e| MatchmakingError::ConfigurationError {
                message: format!("Failed to parse profiles file {}: {}", path.display(), e),
            })?;

        info!(
            "Loaded {} player profiles from {}",
            profiles.len(),
            path.display()
        );
        Ok(Self::with_profiles(profiles))
    }

    pub fn register(&self, profile: PlayerProfile) -> Result<()> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire profiles write lock".to_string(),
            })?;
        profiles.insert(profile.identity.clone(), profile);
        Ok(())
    }

    /// Forget a profile; later lookups report it as unknown
    pub fn unregister(&self, identity: &str) -> Result<bool> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire profiles write lock".to_string(),
            })?;
        Ok(profiles.remove(identity).is_some())
    }

    pub fn len(&self) -> usize {
        self.profiles.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PlayerLookup for InMemoryPlayerDirectory {
    async fn by_summoner_identity(&self, identity: &str) -> Result<Option<PlayerProfile>> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire profiles read lock".to_string(),
            })?;
        Ok(profiles.get(identity).cloned())
    }
}

/// Lookup that accepts every non-empty identity, using it as the display name.
/// Used when no profile source is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenPlayerLookup;

#[async_trait]
impl PlayerLookup for OpenPlayerLookup {
    async fn by_summoner_identity(&self, identity: &str) -> Result<Option<PlayerProfile>> {
        if identity.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(PlayerProfile::new(identity, identity)))
    }
}

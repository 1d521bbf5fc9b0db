//! Common types used throughout the matchmaking queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique player/account key, the natural key of a queue entry
pub type Identity = String;

/// Unique identifier for matches handed to the match-creation system
pub type MatchId = Uuid;

/// Progress of the (future) accept-match handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "u8", try_from = "u8")]
pub enum AcceptanceState {
    #[default]
    Pending,
    Accepted,
    Declined,
}

impl From<AcceptanceState> for u8 {
    fn from(state: AcceptanceState) -> Self {
        match state {
            AcceptanceState::Pending => 0,
            AcceptanceState::Accepted => 1,
            AcceptanceState::Declined => 2,
        }
    }
}

impl TryFrom<u8> for AcceptanceState {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(AcceptanceState::Pending),
            1 => Ok(AcceptanceState::Accepted),
            2 => Ok(AcceptanceState::Declined),
            other => Err(format!("unknown acceptance state code {}", other)),
        }
    }
}

/// One player's current queue membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub identity: Identity,
    pub display_name: String,
    pub region: String,
    /// Rank/LP proxy, captured for future balancing; the alternating split ignores it
    pub skill_value: f64,
    pub primary_role: Option<String>,
    pub secondary_role: Option<String>,
    /// Set once at insert and never rewritten, including on rejoin
    pub joined_at: DateTime<Utc>,
    pub active: bool,
    pub acceptance_state: AcceptanceState,
    /// 1-based rank among active entries; derived, recomputed after every mutation
    pub position: u32,
}

impl QueueEntry {
    /// Build a fresh active entry from a join request and the resolved profile
    pub fn new(request: &JoinRequest, profile: &PlayerProfile, joined_at: DateTime<Utc>) -> Self {
        Self {
            identity: request.identity.clone(),
            display_name: profile.display_name.clone(),
            region: request.region.clone(),
            skill_value: request.skill_value,
            primary_role: request.primary_role.clone(),
            secondary_role: request.secondary_role.clone(),
            joined_at,
            active: true,
            acceptance_state: AcceptanceState::Pending,
            position: 0,
        }
    }

    /// Reactivate a soft-left entry in place, keeping its seniority
    pub fn reactivate(&mut self, request: &JoinRequest, profile: &PlayerProfile) {
        self.display_name = profile.display_name.clone();
        self.region = request.region.clone();
        self.skill_value = request.skill_value;
        self.primary_role = request.primary_role.clone();
        self.secondary_role = request.secondary_role.clone();
        self.active = true;
        self.acceptance_state = AcceptanceState::Pending;
    }

    /// Ordering key: join time ascending, identity breaking ties
    pub fn order_key(&self) -> (DateTime<Utc>, &str) {
        (self.joined_at, self.identity.as_str())
    }
}

/// Resolved player data from the external profile system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub identity: Identity,
    pub display_name: String,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub league_points: Option<i32>,
}

impl PlayerProfile {
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
            tier: None,
            league_points: None,
        }
    }
}

/// Request to enter the matchmaking queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub identity: Identity,
    pub region: String,
    pub skill_value: f64,
    #[serde(default)]
    pub primary_role: Option<String>,
    #[serde(default)]
    pub secondary_role: Option<String>,
}

/// Successful join: the stored entry plus an advisory wait estimate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub entry: QueueEntry,
    pub estimated_wait_seconds: u64,
    /// Always true: the estimate is an approximation, not a guarantee
    pub wait_estimate_advisory: bool,
}

/// Request to leave the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub identity: Identity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub removed: bool,
}

/// Read-only snapshot of the active queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub count: usize,
    pub entries: Vec<QueueEntry>,
    pub is_requester_queued: bool,
}

/// Two teams produced by team formation, in join-time order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSplit<T> {
    pub team_a: Vec<T>,
    pub team_b: Vec<T>,
}

/// Opaque handle returned by the match-creation system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchHandle {
    pub match_id: MatchId,
}

/// Why an entry left the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    PlayerLeft,
    Expired,
    Matched,
    Cleared,
}

/// Event emitted when a player joins or rejoins the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerQueued {
    pub identity: Identity,
    pub region: String,
    pub position: u32,
    pub rejoined: bool,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when an entry leaves the queue for any reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerLeftQueue {
    pub identity: Identity,
    pub reason: LeaveReason,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a tick hands two teams to match creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFormed {
    pub match_id: MatchId,
    pub team_a: Vec<PlayerProfile>,
    pub team_b: Vec<PlayerProfile>,
    pub formed_by: String,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all published messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueEvent {
    PlayerQueued(PlayerQueued),
    PlayerLeftQueue(PlayerLeftQueue),
    MatchFormed(MatchFormed),
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::PlayerQueued(_) => "PlayerQueued",
            QueueEvent::PlayerLeftQueue(_) => "PlayerLeftQueue",
            QueueEvent::MatchFormed(_) => "MatchFormed",
        }
    }
}

//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::*;
use serde_json;

/// Default topic exchange for queue events
pub const QUEUE_EVENTS_EXCHANGE: &str = "matchmaking.queue_events";

/// Routing keys for events
pub const PLAYER_QUEUED_ROUTING_KEY: &str = "queue.joined";
pub const PLAYER_LEFT_ROUTING_KEY: &str = "queue.left";
pub const PLAYER_EXPIRED_ROUTING_KEY: &str = "queue.expired";
pub const MATCH_FORMED_ROUTING_KEY: &str = "match.formed";

/// Routing key for a leave event, split by why the entry went away
pub fn routing_key_for_leave(reason: LeaveReason) -> &'static str {
    match reason {
        LeaveReason::Expired => PLAYER_EXPIRED_ROUTING_KEY,
        LeaveReason::PlayerLeft | LeaveReason::Matched | LeaveReason::Cleared => {
            PLAYER_LEFT_ROUTING_KEY
        }
    }
}

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidQueueRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Request validation shared by every transport
pub struct MessageUtils;

impl MessageUtils {
    /// Validate a join request before it reaches the store
    pub fn validate_join_request(request: &JoinRequest) -> Result<()> {
        if request.identity.trim().is_empty() {
            return Err(MatchmakingError::InvalidQueueRequest {
                reason: "Identity cannot be empty".to_string(),
            }
            .into());
        }

        if request.region.trim().is_empty() {
            return Err(MatchmakingError::InvalidQueueRequest {
                reason: "Region cannot be empty".to_string(),
            }
            .into());
        }

        if !request.skill_value.is_finite() || request.skill_value < 0.0 {
            return Err(MatchmakingError::InvalidQueueRequest {
                reason: "Skill value must be a non-negative number".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Validate a leave request
    pub fn validate_leave_request(request: &LeaveRequest) -> Result<()> {
        if request.identity.trim().is_empty() {
            return Err(MatchmakingError::InvalidQueueRequest {
                reason: "Identity cannot be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

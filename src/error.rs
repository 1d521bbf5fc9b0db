//! Error types for the matchmaking queue
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Typed failures are recovered at the edges with
//! `downcast_ref::<MatchmakingError>()`.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Player is already queued: {identity}")]
    AlreadyQueued { identity: String },

    #[error("Unknown player: {identity}")]
    UnknownPlayer { identity: String },

    #[error("Lock '{name}' unavailable within {wait_ms}ms")]
    LockUnavailable { name: String, wait_ms: u64 },

    #[error("Queue store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Match handoff failed: {message}")]
    HandoffFailed { message: String },

    #[error("Invalid queue request: {reason}")]
    InvalidQueueRequest { reason: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Whether the next scheduled tick/sweep/request may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MatchmakingError::StoreUnavailable { .. }
                | MatchmakingError::LockUnavailable { .. }
                | MatchmakingError::HandoffFailed { .. }
        )
    }

    pub fn store_unavailable(message: impl std::fmt::Display) -> Self {
        MatchmakingError::StoreUnavailable {
            message: message.to_string(),
        }
    }
}

/// Find the typed matchmaking error inside an anyhow chain, if any
pub fn as_matchmaking_error(error: &anyhow::Error) -> Option<&MatchmakingError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<MatchmakingError>())
}

//! Queue Warden - distributed matchmaking queue
//!
//! This crate keeps a shared, join-time ordered queue of players that any
//! number of service instances operate on, and a periodic tick, guarded by a
//! cross-instance lease, that turns the head of the queue into two teams.

pub mod amqp;
pub mod config;
pub mod error;
pub mod lock;
pub mod matchmaking;
pub mod metrics;
pub mod players;
pub mod queue;
pub mod service;
pub mod types;
pub mod utils;
pub mod wait_time;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use lock::TickLock;
pub use matchmaking::{MatchCreation, TickOutcome, TickScheduler};
pub use players::PlayerLookup;
pub use queue::{QueueCoordinator, QueueStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Configuration management for the queue-warden service
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values for the matchmaking queue.

pub mod app;

// Re-export commonly used types
pub use app::{
    validate_config, AmqpSettings, AppConfig, LookupSettings, MatchmakingSettings,
    ServiceSettings, StoreBackend, StoreSettings,
};

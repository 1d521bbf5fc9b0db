//! Wait time estimation for queued players
//!
//! Join responses carry an advisory estimate of how long the player will
//! wait before a tick can form a match.

pub mod calculator;

pub use calculator::{MissingPlayersEstimator, WaitTimeConfig, WaitTimeEstimator};

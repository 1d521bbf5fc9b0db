//! Shared matchmaking queue
//!
//! This module holds the ordered queue store (in-memory and Redis backends)
//! and the coordinator that implements join, leave, status and expiry on top
//! of it.

pub mod coordinator;
pub mod redis_store;
pub mod store;

pub use coordinator::{CoordinatorConfig, QueueCoordinator};
pub use redis_store::RedisQueueStore;
pub use store::{sort_by_join_time, InMemoryQueueStore, QueueStore};

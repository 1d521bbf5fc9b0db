//! Cross-instance mutual exclusion for the matchmaking tick
//!
//! A tick lock is a named lease: at most one holder at a time, acquired with a
//! bounded wait, and expired by the lock provider itself once the hold bound
//! passes so that a crashed holder cannot wedge matchmaking.

pub mod memory;
pub mod redis_lock;

pub use self::memory::InMemoryTickLock;
pub use self::redis_lock::RedisTickLock;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay between acquire attempts while waiting for a held lock
pub const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Proof of holding a lease; required to release it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub name: String,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub hold_bound: Duration,
}

impl LockToken {
    pub fn new(name: &str, hold_bound: Duration) -> Self {
        Self {
            name: name.to_string(),
            token: crate::utils::generate_lock_token(),
            acquired_at: Utc::now(),
            hold_bound,
        }
    }

    /// When the provider will force-release this lease
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + crate::utils::to_chrono(self.hold_bound)
    }
}

/// Trait for named, time-bounded leases
#[async_trait]
pub trait TickLock: Send + Sync {
    /// Try to take the lease, waiting at most `wait_bound`.
    /// Returns `None` when another holder kept it for the whole wait.
    async fn try_acquire(
        &self,
        name: &str,
        wait_bound: Duration,
        hold_bound: Duration,
    ) -> Result<Option<LockToken>>;

    /// Release a lease. Returns false, as a no-op, if `token` is not the
    /// current holder (already expired, or taken over by someone else).
    async fn release(&self, token: &LockToken) -> Result<bool>;
}

//! In-process lease provider
//!
//! Shared behind an `Arc` it serialises any number of simulated instances in
//! one process. Expiry is enforced here, at acquire time, not by the holder.

use crate::error::{MatchmakingError, Result};
use crate::lock::{LockToken, TickLock, ACQUIRE_RETRY_INTERVAL};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Lease {
    token: String,
    expires_at: Instant,
}

/// Lease table keyed by lock name
#[derive(Debug, Default)]
pub struct InMemoryTickLock {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryTickLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder's token, if the lease is live
    pub fn holder(&self, name: &str) -> Option<String> {
        let now = Instant::now();
        self.leases.lock().ok().and_then(|leases| {
            leases
                .get(name)
                .filter(|lease| lease.expires_at > now)
                .map(|lease| lease.token.clone())
        })
    }

    fn attempt(&self, name: &str, hold_bound: Duration) -> Result<Option<LockToken>> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire lease table lock".to_string(),
            })?;

        let now = Instant::now();
        if let Some(lease) = leases.get(name) {
            if lease.expires_at > now {
                return Ok(None);
            }
            debug!("Lease '{}' expired without release, taking over", name);
        }

        let token = LockToken::new(name, hold_bound);
        leases.insert(
            name.to_string(),
            Lease {
                token: token.token.clone(),
                expires_at: now + hold_bound,
            },
        );
        Ok(Some(token))
    }
}

#[async_trait]
impl TickLock for InMemoryTickLock {
    async fn try_acquire(
        &self,
        name: &str,
        wait_bound: Duration,
        hold_bound: Duration,
    ) -> Result<Option<LockToken>> {
        let deadline = Instant::now() + wait_bound;

        loop {
            if let Some(token) = self.attempt(name, hold_bound)? {
                return Ok(Some(token));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(ACQUIRE_RETRY_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn release(&self, token: &LockToken) -> Result<bool> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire lease table lock".to_string(),
            })?;

        let held = leases
            .get(&token.name)
            .is_some_and(|lease| lease.token == token.token && lease.expires_at > Instant::now());
        if held {
            leases.remove(&token.name);
        }
        Ok(held)
    }
}

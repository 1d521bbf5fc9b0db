//! Redis lease provider
//!
//! Acquire is `SET {prefix}:lock:{name} <token> NX PX <hold>`, retried until the
//! wait bound. Redis expires the key after the hold bound whether or not the
//! holder is alive. Release is a compare-and-delete script so only the holder
//! that set the token can remove it.

use crate::error::{MatchmakingError, Result};
use crate::lock::{LockToken, TickLock, ACQUIRE_RETRY_INTERVAL};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const RELEASE_IF_HOLDER: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Tick lock backed by the same Redis the queue store uses
#[derive(Clone)]
pub struct RedisTickLock {
    connection: ConnectionManager,
    key_prefix: String,
    operation_timeout: Duration,
    release_script: Script,
}

impl RedisTickLock {
    pub fn new(connection: ConnectionManager, key_prefix: &str, operation_timeout: Duration) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.to_string(),
            operation_timeout,
            release_script: Script::new(RELEASE_IF_HOLDER),
        }
    }

    fn lock_key(&self, name: &str) -> String {
        format!("{}:lock:{}", self.key_prefix, name)
    }

    async fn attempt(&self, key: &str, token: &LockToken) -> Result<bool> {
        let mut conn = self.connection.clone();
        let hold_ms = token.hold_bound.as_millis().max(1) as u64;
        let mut set = redis::cmd("SET");
        set.arg(key)
            .arg(&token.token)
            .arg("NX")
            .arg("PX")
            .arg(hold_ms);

        let outcome: std::result::Result<redis::RedisResult<Option<String>>, _> =
            tokio::time::timeout(self.operation_timeout, set.query_async(&mut conn)).await;
        match outcome {
            Ok(Ok(reply)) => Ok(reply.is_some()),
            Ok(Err(e)) => Err(MatchmakingError::store_unavailable(format!(
                "redis lock acquire failed: {}",
                e
            ))
            .into()),
            Err(_) => Err(MatchmakingError::store_unavailable("redis lock acquire timed out").into()),
        }
    }
}

#[async_trait]
impl TickLock for RedisTickLock {
    async fn try_acquire(
        &self,
        name: &str,
        wait_bound: Duration,
        hold_bound: Duration,
    ) -> Result<Option<LockToken>> {
        let key = self.lock_key(name);
        let deadline = Instant::now() + wait_bound;

        loop {
            // Fresh token per attempt so acquired_at reflects the winning SET
            let token = LockToken::new(name, hold_bound);
            if self.attempt(&key, &token).await? {
                debug!("Acquired lease '{}' ({})", name, token.token);
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
        let mut invocation = self.release_script.prepare_invoke();
        invocation.key(self.lock_key(&token.name)).arg(&token.token);

        let mut conn = self.connection.clone();
        let released: i64 = tokio::time::timeout(
            self.operation_timeout,
            invocation.invoke_async(&mut conn),
        )
        .await
        .map_err(|_| MatchmakingError::store_unavailable("redis lock release timed out"))?
        .map_err(MatchmakingError::store_unavailable)?;

        if released == 0 {
            warn!(
                "Lease '{}' was no longer held by {} at release",
                token.name, token.token
            );
        }
        Ok(released > 0)
    }
}

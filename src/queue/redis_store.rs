//! Redis-backed queue store shared by every service instance
//!
//! Keys:
//!   `{prefix}:entry:{identity}` – STRING, JSON-encoded `QueueEntry`, `EX entry_ttl`
//!   `{prefix}:order`            – ZSET, member = identity, score = joined_at (unix ms)
//!
//! Equal scores order by member, so the ZSET already breaks join-time ties by
//! identity. An entry key that expired leaves a dangling ZSET member; listings
//! prune those lazily.

use crate::error::{MatchmakingError, Result};
use crate::queue::store::{sort_by_join_time, QueueStore};
use crate::types::QueueEntry;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

const INSERT_IF_ABSENT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[2]) then
  redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
  return 1
end
return 0
"#;

const REMOVE_ENTRY: &str = r#"
local removed = redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return removed
"#;

// KEYS[1] is the order ZSET, KEYS[i + 1] the entry key of ARGV[i]. A member
// re-inserted since it was seen dangling has its entry key again and is kept.
const PRUNE_DANGLING: &str = r#"
local pruned = 0
for i, member in ipairs(ARGV) do
  if redis.call('EXISTS', KEYS[i + 1]) == 0 then
    pruned = pruned + redis.call('ZREM', KEYS[1], member)
  end
end
return pruned
"#;

const CLEAR_ALL: &str = r#"
local members = redis.call('ZRANGE', KEYS[1], 0, -1)
local removed = 0
for _, member in ipairs(members) do
  removed = removed + redis.call('DEL', ARGV[1] .. member)
end
redis.call('DEL', KEYS[1])
return removed
"#;

/// Queue store backed by a shared Redis instance
#[derive(Clone)]
pub struct RedisQueueStore {
    connection: ConnectionManager,
    key_prefix: String,
    entry_ttl: Duration,
    operation_timeout: Duration,
    insert_script: Script,
    remove_script: Script,
    prune_script: Script,
    clear_script: Script,
}

impl RedisQueueStore {
    /// Connect to Redis and build a store
    pub async fn connect(
        redis_url: &str,
        key_prefix: &str,
        entry_ttl: Duration,
        operation_timeout: Duration,
    ) -> Result<Self> {
        info!("Connecting queue store to Redis at {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| MatchmakingError::ConfigurationError {
                message: format!("Invalid Redis URL {}: {}", redis_url, e),
            })?;

        let connection = tokio::time::timeout(operation_timeout * 5, client.get_connection_manager())
            .await
            .map_err(|_| MatchmakingError::store_unavailable("timed out connecting to Redis"))?
            .map_err(MatchmakingError::store_unavailable)?;

        Ok(Self::with_connection(
            connection,
            key_prefix,
            entry_ttl,
            operation_timeout,
        ))
    }

    /// Build a store over an existing connection manager
    pub fn with_connection(
        connection: ConnectionManager,
        key_prefix: &str,
        entry_ttl: Duration,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.to_string(),
            entry_ttl,
            operation_timeout,
            insert_script: Script::new(INSERT_IF_ABSENT),
            remove_script: Script::new(REMOVE_ENTRY),
            prune_script: Script::new(PRUNE_DANGLING),
            clear_script: Script::new(CLEAR_ALL),
        }
    }

    /// Connection manager handle, shared with the Redis tick lock
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Round-trip check used by health probes
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = self
            .bounded("ping", async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        Ok(())
    }

    fn entry_key(&self, identity: &str) -> String {
        format!("{}{}", self.entry_key_prefix(), identity)
    }

    fn entry_key_prefix(&self) -> String {
        format!("{}:entry:", self.key_prefix)
    }

    fn order_key(&self) -> String {
        format!("{}:order", self.key_prefix)
    }

    fn ttl_seconds(&self) -> u64 {
        self.entry_ttl.as_secs().max(1)
    }

    /// Run one store round trip under the operation timeout.
    /// Timeouts and connection failures surface as `StoreUnavailable`.
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(MatchmakingError::store_unavailable(format!(
                "redis {} failed: {}",
                operation, e
            ))
            .into()),
            Err(_) => Err(MatchmakingError::store_unavailable(format!(
                "redis {} timed out after {:?}",
                operation, self.operation_timeout
            ))
            .into()),
        }
    }

    fn encode(entry: &QueueEntry) -> Result<String> {
        serde_json::to_string(entry).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to encode queue entry: {}", e),
            }
            .into()
        })
    }

    fn decode(raw: &str) -> Result<QueueEntry> {
        serde_json::from_str(raw).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to decode queue entry: {}", e),
            }
            .into()
        })
    }

    /// Every stored entry in ZSET order, pruning members whose entry expired
    async fn load_all(&self) -> Result<Vec<QueueEntry>> {
        let order_key = self.order_key();

        let mut conn = self.connection.clone();
        let key = order_key.clone();
        let members: Vec<String> = self
            .bounded("zrange", async move { conn.zrange(key, 0, -1).await })
            .await?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = members.iter().map(|m| self.entry_key(m)).collect();
        let mut conn = self.connection.clone();
        let raw: Vec<Option<String>> = self
            .bounded("mget", async move { conn.mget(keys).await })
            .await?;

        let mut entries = Vec::with_capacity(members.len());
        let mut dangling = Vec::new();
        for (member, value) in members.into_iter().zip(raw) {
            match value {
                Some(json) => entries.push(Self::decode(&json)?),
                None => dangling.push(member),
            }
        }

        if !dangling.is_empty() {
            let mut invocation = self.prune_script.prepare_invoke();
            invocation.key(&order_key);
            for member in &dangling {
                invocation.key(self.entry_key(member)).arg(member);
            }

            let mut conn = self.connection.clone();
            let pruned: i64 = self
                .bounded("prune", async move { invocation.invoke_async(&mut conn).await })
                .await?;
            debug!(
                "Pruned {} of {} expired queue members",
                pruned,
                dangling.len()
            );
        }

        Ok(entries)
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn insert(&self, entry: QueueEntry) -> Result<bool> {
        let json = Self::encode(&entry)?;
        let mut invocation = self.insert_script.prepare_invoke();
        invocation
            .key(self.entry_key(&entry.identity))
            .key(self.order_key())
            .arg(json)
            .arg(self.ttl_seconds())
            .arg(entry.joined_at.timestamp_millis())
            .arg(&entry.identity);

        let mut conn = self.connection.clone();
        let inserted: i64 = self
            .bounded("insert", async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(inserted == 1)
    }

    async fn replace(&self, entry: QueueEntry) -> Result<bool> {
        let json = Self::encode(&entry)?;
        let key = self.entry_key(&entry.identity);
        let ttl = self.ttl_seconds();

        let mut conn = self.connection.clone();
        let reply: Option<String> = self
            .bounded("replace", async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(json)
                    .arg("XX")
                    .arg("EX")
                    .arg(ttl)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn remove(&self, identity: &str) -> Result<bool> {
        let mut invocation = self.remove_script.prepare_invoke();
        invocation
            .key(self.entry_key(identity))
            .key(self.order_key())
            .arg(identity);

        let mut conn = self.connection.clone();
        let removed: i64 = self
            .bounded("remove", async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(removed > 0)
    }

    async fn get(&self, identity: &str) -> Result<Option<QueueEntry>> {
        let key = self.entry_key(identity);
        let mut conn = self.connection.clone();
        let raw: Option<String> = self
            .bounded("get", async move { conn.get(key).await })
            .await?;

        raw.as_deref().map(Self::decode).transpose()
    }

    async fn list_active_ordered_by_join_time(&self) -> Result<Vec<QueueEntry>> {
        let mut active: Vec<QueueEntry> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|entry| entry.active)
            .collect();

        // ZSET scores are millisecond-truncated; order on the full timestamp
        sort_by_join_time(&mut active);
        Ok(active)
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.list_active_ordered_by_join_time().await?.len())
    }

    async fn clear(&self) -> Result<usize> {
        let mut invocation = self.clear_script.prepare_invoke();
        invocation.key(self.order_key()).arg(self.entry_key_prefix());

        let mut conn = self.connection.clone();
        let removed: i64 = self
            .bounded("clear", async move { invocation.invoke_async(&mut conn).await })
            .await?;

        info!("Cleared {} entries from Redis queue store", removed);
        Ok(removed.max(0) as usize)
    }
}

// These run against a live server: `REDIS_URL=redis://... cargo test -- --ignored`
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JoinRequest, PlayerProfile};
    use chrono::{DateTime, Utc};

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string())
    }

    async fn store_with_ttl(entry_ttl: Duration) -> RedisQueueStore {
        let prefix = format!("queue-test-{}", uuid::Uuid::new_v4());
        RedisQueueStore::connect(&redis_url(), &prefix, entry_ttl, Duration::from_secs(2))
            .await
            .unwrap()
    }

    async fn store() -> RedisQueueStore {
        store_with_ttl(Duration::from_secs(60)).await
    }

    fn entry(identity: &str, joined_at: DateTime<Utc>) -> QueueEntry {
        let request = JoinRequest {
            identity: identity.to_string(),
            region: "euw".to_string(),
            skill_value: 1500.0,
            primary_role: None,
            secondary_role: None,
        };
        QueueEntry::new(&request, &PlayerProfile::new(identity, identity), joined_at)
    }

    fn identities(entries: &[QueueEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.identity.as_str()).collect()
    }

    async fn order_members(store: &RedisQueueStore) -> Vec<String> {
        let mut conn = store.connection();
        conn.zrange(store.order_key(), 0, -1).await.unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a Redis server (REDIS_URL)"]
    async fn test_insert_is_insert_if_absent() {
        let store = store().await;
        let now = Utc::now();

        assert!(store.insert(entry("p1", now)).await.unwrap());
        assert!(!store.insert(entry("p1", now)).await.unwrap());

        let stored = store.get("p1").await.unwrap().unwrap();
        assert_eq!(stored.identity, "p1");
        assert_eq!(stored.joined_at, now);
        assert_eq!(store.size().await.unwrap(), 1);

        store.clear().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a Redis server (REDIS_URL)"]
    async fn test_replace_only_updates_present_entries() {
        let store = store().await;
        let now = Utc::now();

        assert!(!store.replace(entry("ghost", now)).await.unwrap());
        assert!(store.get("ghost").await.unwrap().is_none());

        store.insert(entry("p1", now)).await.unwrap();
        let mut updated = entry("p1", now);
        updated.active = false;
        updated.position = 7;
        assert!(store.replace(updated).await.unwrap());

        let stored = store.get("p1").await.unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(stored.position, 7);
        // Inactive entries are not counted
        assert_eq!(store.size().await.unwrap(), 0);

        store.clear().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a Redis server (REDIS_URL)"]
    async fn test_remove_is_idempotent() {
        let store = store().await;
        store.insert(entry("p1", Utc::now())).await.unwrap();

        assert!(store.remove("p1").await.unwrap());
        assert!(!store.remove("p1").await.unwrap());
        assert!(store.get("p1").await.unwrap().is_none());
        assert!(order_members(&store).await.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a Redis server (REDIS_URL)"]
    async fn test_ordering_by_join_time_then_identity() {
        let store = store().await;
        let base = Utc::now();

        store.insert(entry("c", base + chrono::Duration::seconds(2))).await.unwrap();
        store.insert(entry("b", base)).await.unwrap();
        store.insert(entry("a", base)).await.unwrap();
        store.insert(entry("d", base + chrono::Duration::seconds(1))).await.unwrap();

        let listed = store.list_active_ordered_by_join_time().await.unwrap();
        assert_eq!(identities(&listed), vec!["a", "b", "d", "c"]);

        let oldest = store.range_oldest(2).await.unwrap();
        assert_eq!(identities(&oldest), vec!["a", "b"]);

        assert_eq!(store.clear().await.unwrap(), 4);
        assert!(store.list_active_ordered_by_join_time().await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a Redis server (REDIS_URL)"]
    async fn test_expired_entries_are_pruned_from_the_order() {
        let store = store_with_ttl(Duration::from_secs(1)).await;
        store.insert(entry("p1", Utc::now())).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(store.get("p1").await.unwrap().is_none());
        assert!(store.list_active_ordered_by_join_time().await.unwrap().is_empty());
        assert!(order_members(&store).await.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a Redis server (REDIS_URL)"]
    async fn test_prune_keeps_members_that_were_reinserted() {
        let store = store().await;
        store.insert(entry("p1", Utc::now())).await.unwrap();

        let mut conn = store.connection();
        let _: i64 = conn.zadd(store.order_key(), "ghost", 1).await.unwrap();

        // p1 was seen dangling earlier but has been inserted again since
        let mut invocation = store.prune_script.prepare_invoke();
        invocation
            .key(store.order_key())
            .key(store.entry_key("p1"))
            .arg("p1")
            .key(store.entry_key("ghost"))
            .arg("ghost");
        let pruned: i64 = invocation.invoke_async(&mut conn).await.unwrap();

        assert_eq!(pruned, 1);
        assert_eq!(order_members(&store).await, vec!["p1".to_string()]);
        assert_eq!(
            identities(&store.list_active_ordered_by_join_time().await.unwrap()),
            vec!["p1"]
        );

        store.clear().await.unwrap();
    }
}

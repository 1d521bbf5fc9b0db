//! Queue store interface and the in-memory implementation
//!
//! The store is the single source of truth for queue membership. Every
//! operation is atomic with respect to one entry; listings are consistent
//! snapshots ordered by `joined_at` ascending with the identity breaking ties.

use crate::error::{MatchmakingError, Result};
use crate::types::QueueEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Trait for the shared, ordered queue repository
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert an entry unless one already exists for its identity.
    /// Returns false, without writing, when the identity is already present.
    async fn insert(&self, entry: QueueEntry) -> Result<bool>;

    /// Overwrite an existing entry and refresh its TTL.
    /// Returns false, without writing, when the identity is absent.
    async fn replace(&self, entry: QueueEntry) -> Result<bool>;

    /// Delete an entry. Deleting an absent identity is a no-op returning false.
    async fn remove(&self, identity: &str) -> Result<bool>;

    /// Fetch one entry, active or not
    async fn get(&self, identity: &str) -> Result<Option<QueueEntry>>;

    /// All active entries ordered by join time
    async fn list_active_ordered_by_join_time(&self) -> Result<Vec<QueueEntry>>;

    /// The `n` most senior active entries
    async fn range_oldest(&self, n: usize) -> Result<Vec<QueueEntry>> {
        let mut entries = self.list_active_ordered_by_join_time().await?;
        entries.truncate(n);
        Ok(entries)
    }

    /// Number of active entries
    async fn size(&self) -> Result<usize>;

    /// Delete every entry. Returns how many were removed.
    async fn clear(&self) -> Result<usize>;
}

/// Sort entries into queue order
pub fn sort_by_join_time(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
}

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: QueueEntry,
    expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// In-memory queue store
///
/// Share one instance behind an `Arc` to model several service instances
/// talking to the same backing store. Reads hide expired entries; inserts
/// drop them.
#[derive(Debug)]
pub struct InMemoryQueueStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
    entry_ttl: chrono::Duration,
    available: AtomicBool,
}

impl InMemoryQueueStore {
    /// Create a store whose entries expire `entry_ttl` after their last write
    pub fn new(entry_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            entry_ttl: crate::utils::to_chrono(entry_ttl),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backing store going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Total stored entries, including inactive ones
    pub fn stored_count(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MatchmakingError::store_unavailable("in-memory store switched off").into())
        }
    }

    fn expiry_from_now(&self) -> DateTime<Utc> {
        Utc::now() + self.entry_ttl
    }

    fn write_lock_error() -> MatchmakingError {
        MatchmakingError::InternalError {
            message: "Failed to acquire queue store write lock".to_string(),
        }
    }

    fn read_lock_error() -> MatchmakingError {
        MatchmakingError::InternalError {
            message: "Failed to acquire queue store read lock".to_string(),
        }
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, entry: QueueEntry) -> Result<bool> {
        self.ensure_available()?;
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(|_| Self::write_lock_error())?;

        // Dead entries are dropped here so the map only grows with live ones
        entries.retain(|_, stored| stored.is_live(now));
        if entries.contains_key(&entry.identity) {
            return Ok(false);
        }

        let expires_at = self.expiry_from_now();
        entries.insert(entry.identity.clone(), StoredEntry { entry, expires_at });
        Ok(true)
    }

    async fn replace(&self, entry: QueueEntry) -> Result<bool> {
        self.ensure_available()?;
        let now = Utc::now();
        let expires_at = self.expiry_from_now();
        let mut entries = self.entries.write().map_err(|_| Self::write_lock_error())?;

        match entries.get_mut(&entry.identity) {
            Some(stored) if stored.is_live(now) => {
                stored.entry = entry;
                stored.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, identity: &str) -> Result<bool> {
        self.ensure_available()?;
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(|_| Self::write_lock_error())?;

        Ok(entries
            .remove(identity)
            .is_some_and(|stored| stored.is_live(now)))
    }

    async fn get(&self, identity: &str) -> Result<Option<QueueEntry>> {
        self.ensure_available()?;
        let now = Utc::now();
        let entries = self.entries.read().map_err(|_| Self::read_lock_error())?;

        Ok(entries
            .get(identity)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.entry.clone()))
    }

    async fn list_active_ordered_by_join_time(&self) -> Result<Vec<QueueEntry>> {
        self.ensure_available()?;
        let now = Utc::now();
        let mut active: Vec<QueueEntry> = {
            let entries = self.entries.read().map_err(|_| Self::read_lock_error())?;
            entries
                .values()
                .filter(|stored| stored.is_live(now) && stored.entry.active)
                .map(|stored| stored.entry.clone())
                .collect()
        };

        sort_by_join_time(&mut active);
        Ok(active)
    }

    async fn size(&self) -> Result<usize> {
        self.ensure_available()?;
        let now = Utc::now();
        let entries = self.entries.read().map_err(|_| Self::read_lock_error())?;

        Ok(entries
            .values()
            .filter(|stored| stored.is_live(now) && stored.entry.active)
            .count())
    }

    async fn clear(&self) -> Result<usize> {
        self.ensure_available()?;
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(|_| Self::write_lock_error())?;

        let live = entries.values().filter(|stored| stored.is_live(now)).count();
        entries.clear();
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::as_matchmaking_error;
    use crate::types::AcceptanceState;

    fn entry(identity: &str, joined_secs_ago: i64) -> QueueEntry {
        QueueEntry {
            identity: identity.to_string(),
            display_name: identity.to_uppercase(),
            region: "euw".to_string(),
            skill_value: 1000.0,
            primary_role: None,
            secondary_role: None,
            joined_at: Utc::now() - chrono::Duration::seconds(joined_secs_ago),
            active: true,
            acceptance_state: AcceptanceState::Pending,
            position: 0,
        }
    }

    #[tokio::test]
    async fn test_insert_is_insert_if_absent() {
        let store = InMemoryQueueStore::default();

        assert!(store.insert(entry("p1", 10)).await.unwrap());
        assert!(!store.insert(entry("p1", 0)).await.unwrap());

        let stored = store.get("p1").await.unwrap().unwrap();
        assert!(stored.joined_at < Utc::now() - chrono::Duration::seconds(5));
        assert_eq!(store.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_only_touches_existing_entries() {
        let store = InMemoryQueueStore::default();

        assert!(!store.replace(entry("ghost", 0)).await.unwrap());
        assert!(store.get("ghost").await.unwrap().is_none());

        store.insert(entry("p1", 0)).await.unwrap();
        let mut updated = entry("p1", 0);
        updated.position = 4;
        assert!(store.replace(updated).await.unwrap());
        assert_eq!(store.get("p1").await.unwrap().unwrap().position, 4);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = InMemoryQueueStore::default();
        store.insert(entry("p1", 0)).await.unwrap();

        assert!(store.remove("p1").await.unwrap());
        assert!(!store.remove("p1").await.unwrap());
        assert!(!store.remove("never-there").await.unwrap());
    }

    #[tokio::test]
    async fn test_listing_orders_by_join_time_then_identity() {
        let store = InMemoryQueueStore::default();
        let shared_time = Utc::now() - chrono::Duration::seconds(30);

        let mut b = entry("b", 0);
        b.joined_at = shared_time;
        let mut a = entry("a", 0);
        a.joined_at = shared_time;
        store.insert(entry("newest", 1)).await.unwrap();
        store.insert(b).await.unwrap();
        store.insert(entry("oldest", 300)).await.unwrap();
        store.insert(a).await.unwrap();

        let mut inactive = entry("left", 600);
        inactive.active = false;
        store.insert(inactive).await.unwrap();

        let order: Vec<String> = store
            .list_active_ordered_by_join_time()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.identity)
            .collect();
        assert_eq!(order, vec!["oldest", "a", "b", "newest"]);

        let oldest: Vec<String> = store
            .range_oldest(2)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.identity)
            .collect();
        assert_eq!(oldest, vec!["oldest", "a"]);

        assert_eq!(store.size().await.unwrap(), 4);
        assert_eq!(store.stored_count(), 5);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let store = InMemoryQueueStore::new(Duration::from_millis(50));
        store.insert(entry("p1", 0)).await.unwrap();
        assert_eq!(store.size().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(store.size().await.unwrap(), 0);
        assert!(store.get("p1").await.unwrap().is_none());
        assert!(store.list_active_ordered_by_join_time().await.unwrap().is_empty());
        // An expired identity can join again
        assert!(store.insert(entry("p1", 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_drops_expired_entries() {
        let store = InMemoryQueueStore::new(Duration::from_millis(50));
        for i in 0..3 {
            store.insert(entry(&format!("old{}", i), 0)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        store.insert(entry("fresh", 0)).await.unwrap();

        let held = store.entries.read().unwrap().len();
        assert_eq!(held, 1);
        assert_eq!(store.stored_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let store = InMemoryQueueStore::default();
        for i in 0..3 {
            store.insert(entry(&format!("p{}", i), i)).await.unwrap();
        }

        assert_eq!(store.clear().await.unwrap(), 3);
        assert_eq!(store.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors_instead_of_reporting_empty() {
        let store = InMemoryQueueStore::default();
        store.insert(entry("p1", 0)).await.unwrap();
        store.set_available(false);

        let error = store.list_active_ordered_by_join_time().await.unwrap_err();
        assert!(matches!(
            as_matchmaking_error(&error),
            Some(MatchmakingError::StoreUnavailable { .. })
        ));
        assert!(store.size().await.is_err());

        store.set_available(true);
        assert_eq!(store.size().await.unwrap(), 1);
    }
}

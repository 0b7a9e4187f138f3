use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use super::{CacheLifetime, CacheStore};
use crate::errors::RepoError;

#[derive(Debug)]
struct CacheItem {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheItem {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug, Default)]
struct MemoryCacheState {
    items: HashMap<String, CacheItem>,
    tags: HashMap<String, HashSet<String>>,
    unavailable: bool,
}

/// In-process cache store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    state: Arc<Mutex<MemoryCacheState>>,
    tags: bool,
}

impl MemoryCacheStore {
    /// A store without tag support; flushing falls back to the key index.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tag-aware store.
    pub fn tagged() -> Self {
        Self {
            tags: true,
            ..Self::default()
        }
    }

    /// Simulates an outage: every operation fails until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.lock().items.values().filter(|item| !item.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Utc::now();
        self.lock().items.get(key).is_some_and(|item| !item.is_expired(now))
    }

    fn lock(&self) -> MutexGuard<'_, MemoryCacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn available(&self) -> Result<MutexGuard<'_, MemoryCacheState>, RepoError> {
        let state = self.lock();
        if state.unavailable {
            return Err(RepoError::Cache {
                message: "memory cache store is unavailable".to_string(),
            });
        }
        Ok(state)
    }
}

fn expiry(lifetime: CacheLifetime) -> Option<DateTime<Utc>> {
    match lifetime {
        CacheLifetime::Forever => None,
        // Lifetimes too large to represent never expire.
        CacheLifetime::Seconds(seconds) => i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime)),
    }
}

impl CacheStore for MemoryCacheStore {
    fn supports_tags(&self) -> bool {
        self.tags
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, RepoError> {
        let mut state = self.available()?;
        let now = Utc::now();
        if state.items.get(key).is_some_and(|item| item.is_expired(now)) {
            state.items.remove(key);
            return Ok(None);
        }
        Ok(state.items.get(key).map(|item| item.value.clone()))
    }

    async fn put(&self, key: &str, value: Value, lifetime: CacheLifetime) -> Result<(), RepoError> {
        let mut state = self.available()?;
        state.items.insert(
            key.to_string(),
            CacheItem {
                value,
                expires_at: expiry(lifetime),
            },
        );
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool, RepoError> {
        let mut state = self.available()?;
        Ok(state.items.remove(key).is_some())
    }

    async fn put_tagged(&self, tag: &str, key: &str, value: Value, lifetime: CacheLifetime) -> Result<(), RepoError> {
        if !self.tags {
            return Err(RepoError::Cache {
                message: "this cache store does not support tagging".to_string(),
            });
        }
        self.put(key, value, lifetime).await?;
        let mut state = self.available()?;
        state.tags.entry(tag.to_string()).or_default().insert(key.to_string());
        Ok(())
    }

    async fn flush_tag(&self, tag: &str) -> Result<(), RepoError> {
        if !self.tags {
            return Err(RepoError::Cache {
                message: "this cache store does not support tagging".to_string(),
            });
        }
        let mut state = self.available()?;
        if let Some(keys) = state.tags.remove(tag) {
            for key in keys {
                state.items.remove(&key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_forget() {
        let store = MemoryCacheStore::new();
        store.put("a", json!([1, 2]), CacheLifetime::Forever).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!([1, 2])));
        assert!(store.forget("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let store = MemoryCacheStore::new();
        store.put("a", json!(1), CacheLifetime::Seconds(60)).await.unwrap();
        store.lock().items.get_mut("a").unwrap().expires_at = Some(Utc::now() - Duration::seconds(1));
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn flush_tag_only_drops_tagged_keys() {
        let store = MemoryCacheStore::tagged();
        store.put_tagged("users", "u1", json!(1), CacheLifetime::Forever).await.unwrap();
        store.put_tagged("posts", "p1", json!(2), CacheLifetime::Forever).await.unwrap();
        store.flush_tag("users").await.unwrap();
        assert!(!store.contains("u1"));
        assert!(store.contains("p1"));
    }

    #[tokio::test]
    async fn untagged_store_rejects_tags() {
        let store = MemoryCacheStore::new();
        assert!(store.put_tagged("users", "u1", json!(1), CacheLifetime::Forever).await.is_err());
        assert!(store.flush_tag("users").await.is_err());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryCacheStore::new();
        store.set_available(false);
        assert!(matches!(store.get("a").await, Err(RepoError::Cache { .. })));
        store.set_available(true);
        assert!(store.get("a").await.unwrap().is_none());
    }
}

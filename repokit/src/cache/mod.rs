//! Result caching keyed by query fingerprint.
//!
//! Stores implement [`CacheStore`]; a [`CacheManager`] maps driver names to
//! stores and the [`CacheOrchestrator`] decides per call whether to serve from
//! cache, and flushes a repository's entries by tag or through the [`KeyIndex`].

mod index;
mod memory;
mod orchestrator;
mod redis_store;

pub use index::KeyIndex;
pub use memory::MemoryCacheStore;
pub use orchestrator::{CacheOrchestrator, CachedCall};
pub use redis_store::RedisCacheStore;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::errors::RepoError;

/// How long a cached result lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLifetime {
    Forever,
    Seconds(u64),
}

impl CacheLifetime {
    /// Interprets a configured lifetime: `-1` is forever, positive values are
    /// seconds, anything else disables caching.
    pub fn from_setting(setting: Option<i64>) -> Option<Self> {
        match setting? {
            -1 => Some(CacheLifetime::Forever),
            seconds if seconds > 0 => Some(CacheLifetime::Seconds(seconds as u64)),
            _ => None,
        }
    }
}

/// Key/value cache collaborator, optionally tag-aware.
#[allow(async_fn_in_trait)]
pub trait CacheStore {
    fn supports_tags(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<Value>, RepoError>;

    async fn put(&self, key: &str, value: Value, lifetime: CacheLifetime) -> Result<(), RepoError>;

    async fn forget(&self, key: &str) -> Result<bool, RepoError>;

    async fn get_tagged(&self, _tag: &str, key: &str) -> Result<Option<Value>, RepoError> {
        self.get(key).await
    }

    async fn put_tagged(&self, _tag: &str, _key: &str, _value: Value, _lifetime: CacheLifetime) -> Result<(), RepoError> {
        Err(RepoError::Cache {
            message: "this cache store does not support tagging".to_string(),
        })
    }

    async fn flush_tag(&self, _tag: &str) -> Result<(), RepoError> {
        Err(RepoError::Cache {
            message: "this cache store does not support tagging".to_string(),
        })
    }
}

/// The concrete stores a [`CacheManager`] can hold.
#[derive(Clone)]
pub enum CacheBackend {
    Memory(MemoryCacheStore),
    Redis(RedisCacheStore),
}

impl From<MemoryCacheStore> for CacheBackend {
    fn from(store: MemoryCacheStore) -> Self {
        CacheBackend::Memory(store)
    }
}

impl From<RedisCacheStore> for CacheBackend {
    fn from(store: RedisCacheStore) -> Self {
        CacheBackend::Redis(store)
    }
}

impl CacheStore for CacheBackend {
    fn supports_tags(&self) -> bool {
        match self {
            CacheBackend::Memory(store) => store.supports_tags(),
            CacheBackend::Redis(store) => store.supports_tags(),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, RepoError> {
        match self {
            CacheBackend::Memory(store) => store.get(key).await,
            CacheBackend::Redis(store) => store.get(key).await,
        }
    }

    async fn put(&self, key: &str, value: Value, lifetime: CacheLifetime) -> Result<(), RepoError> {
        match self {
            CacheBackend::Memory(store) => store.put(key, value, lifetime).await,
            CacheBackend::Redis(store) => store.put(key, value, lifetime).await,
        }
    }

    async fn forget(&self, key: &str) -> Result<bool, RepoError> {
        match self {
            CacheBackend::Memory(store) => store.forget(key).await,
            CacheBackend::Redis(store) => store.forget(key).await,
        }
    }

    async fn get_tagged(&self, tag: &str, key: &str) -> Result<Option<Value>, RepoError> {
        match self {
            CacheBackend::Memory(store) => store.get_tagged(tag, key).await,
            CacheBackend::Redis(store) => store.get_tagged(tag, key).await,
        }
    }

    async fn put_tagged(&self, tag: &str, key: &str, value: Value, lifetime: CacheLifetime) -> Result<(), RepoError> {
        match self {
            CacheBackend::Memory(store) => store.put_tagged(tag, key, value, lifetime).await,
            CacheBackend::Redis(store) => store.put_tagged(tag, key, value, lifetime).await,
        }
    }

    async fn flush_tag(&self, tag: &str) -> Result<(), RepoError> {
        match self {
            CacheBackend::Memory(store) => store.flush_tag(tag).await,
            CacheBackend::Redis(store) => store.flush_tag(tag).await,
        }
    }
}

/// Named cache stores.
///
/// Clones share the record of flushes that failed, so every repository bound
/// to the same manager stops trusting a repository's entries until one of
/// them manages to flush.
#[derive(Clone, Default)]
pub struct CacheManager {
    stores: HashMap<String, CacheBackend>,
    stale: Arc<Mutex<HashSet<String>>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, name: impl Into<String>, store: impl Into<CacheBackend>) -> Self {
        self.stores.insert(name.into(), store.into());
        self
    }

    pub fn store(&self, name: &str) -> Result<&CacheBackend, RepoError> {
        self.stores.get(name).ok_or_else(|| RepoError::ContainerResolution {
            service: format!("cache.stores.{name}"),
        })
    }

    pub(crate) fn is_stale(&self, driver: &str, class: &str) -> bool {
        self.stale().contains(&stale_key(driver, class))
    }

    pub(crate) fn mark_stale(&self, driver: &str, class: &str, stale: bool) {
        let key = stale_key(driver, class);
        if stale {
            self.stale().insert(key);
        } else {
            self.stale().remove(&key);
        }
    }

    fn stale(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.stale.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn stale_key(driver: &str, class: &str) -> String {
    format!("{driver}/{class}")
}

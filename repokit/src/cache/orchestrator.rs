use std::future::Future;

use serde::{Serialize, de::DeserializeOwned};

use super::{CacheBackend, CacheLifetime, CacheManager, CacheStore, KeyIndex};
use crate::{
    errors::RepoError,
    fingerprint::{FingerprintInput, fingerprint},
};

/// One cacheable repository call.
pub struct CachedCall<'a, A: Serialize + ?Sized> {
    /// Repository class, prefix of the cache key.
    pub class: &'a str,
    pub method: &'a str,
    /// Repository identifier, used as the cache tag.
    pub tag: &'a str,
    /// Skip the cache entirely (cache disabled, or skip requested by the caller).
    pub bypass: bool,
    pub input: FingerprintInput<'a, A>,
}

/// Serves repository calls from cache or runs them and stores the result.
///
/// Failures of the cache layer never fail the call: an unknown driver, an
/// unreachable store, an unserializable fingerprint or a corrupt payload are
/// logged and the producer runs uncached. Errors from the producer itself
/// always propagate and are never cached.
///
/// A repository whose last flush failed is not served from cache again until
/// a flush succeeds; every cached call retries it first.
#[derive(Clone)]
pub struct CacheOrchestrator {
    manager: CacheManager,
    index: KeyIndex,
}

impl CacheOrchestrator {
    pub fn new(manager: CacheManager, index: KeyIndex) -> Self {
        Self { manager, index }
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    pub fn index(&self) -> &KeyIndex {
        &self.index
    }

    pub async fn execute<A, T, F, Fut>(&self, call: CachedCall<'_, A>, producer: F) -> Result<T, RepoError>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RepoError>>,
    {
        if call.bypass {
            return producer().await;
        }
        let Some(lifetime) = CacheLifetime::from_setting(call.input.cache_lifetime) else {
            return producer().await;
        };
        let hash = match fingerprint(&call.input) {
            Ok(hash) => hash,
            Err(err) => {
                log::warn!("{}@{}: not caching, {err}", call.class, call.method);
                return producer().await;
            }
        };
        let store = match self.manager.store(call.input.cache_driver) {
            Ok(store) => store,
            Err(err) => {
                log::warn!("{}@{}: not caching, {err}", call.class, call.method);
                return producer().await;
            }
        };

        if self.manager.is_stale(call.input.cache_driver, call.class) {
            if let Err(err) = self.flush(call.class, call.tag, call.input.cache_driver).await {
                log::warn!("{}@{}: not caching, earlier flush still pending: {err}", call.class, call.method);
                return producer().await;
            }
        }

        let entry = format!("{}.{}", call.method, hash);
        let key = format!("{}@{}", call.class, entry);

        let cached = if store.supports_tags() {
            store.get_tagged(call.tag, &key).await
        } else {
            store.get(&key).await
        };
        match cached {
            Ok(Some(value)) => match serde_json::from_value::<T>(value) {
                Ok(result) => {
                    log::debug!("cache hit {key}");
                    return Ok(result);
                }
                Err(err) => log::warn!("discarding unreadable cache entry {key}: {err}"),
            },
            Ok(None) => log::debug!("cache miss {key}"),
            Err(err) => log::warn!("cache read failed for {key}: {err}"),
        }

        let result = producer().await?;
        if let Err(err) = self.remember(store, &call, &entry, &key, &result, lifetime).await {
            log::warn!("cache write failed for {key}: {err}");
        }
        Ok(result)
    }

    async fn remember<A, T>(
        &self,
        store: &CacheBackend,
        call: &CachedCall<'_, A>,
        entry: &str,
        key: &str,
        result: &T,
        lifetime: CacheLifetime,
    ) -> Result<(), RepoError>
    where
        A: Serialize + ?Sized,
        T: Serialize,
    {
        let value = serde_json::to_value(result).map_err(|err| RepoError::serialization("cached value", err))?;
        if store.supports_tags() {
            store.put_tagged(call.tag, key, value, lifetime).await
        } else {
            store.put(key, value, lifetime).await?;
            self.index.register(call.class, entry).await
        }
    }

    /// Drops every entry cached for a repository, by tag when the driver
    /// supports it, otherwise by sweeping the key index.
    ///
    /// On failure the repository is marked stale in the manager; see
    /// [`CacheOrchestrator::execute`].
    pub async fn flush(&self, class: &str, tag: &str, driver: &str) -> Result<(), RepoError> {
        let result = self.sweep(class, tag, driver).await;
        self.manager.mark_stale(driver, class, result.is_err());
        result
    }

    async fn sweep(&self, class: &str, tag: &str, driver: &str) -> Result<(), RepoError> {
        let store = self.manager.store(driver)?;
        if store.supports_tags() {
            store.flush_tag(tag).await?;
            log::info!("flushed cache tag {tag}");
            return Ok(());
        }
        let entries = self.index.entries(class).await?;
        let mut forgotten = Vec::with_capacity(entries.len());
        let mut failure = None;
        for entry in entries {
            match store.forget(&format!("{class}@{entry}")).await {
                Ok(_) => forgotten.push(entry),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        // entries that could not be forgotten stay indexed for the next sweep
        self.index.discard(class, &forgotten).await?;
        log::info!("flushed {} cached entries for {class}", forgotten.len());
        failure.map_or(Ok(()), Err)
    }
}

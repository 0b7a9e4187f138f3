use redis::{aio::ConnectionManager, cmd};
use serde_json::Value;

use super::{CacheLifetime, CacheStore};
use crate::errors::RepoError;

/// Redis-backed, tag-aware cache store.
///
/// Values are stored as JSON strings under `{prefix}{key}`; each tag is a Redis
/// set at `{prefix}tag:{tag}` listing the keys written under it.
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisCacheStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            prefix: "repokit:cache:".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub async fn connect(url: &str) -> Result<Self, RepoError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{}", self.prefix, tag)
    }
}

impl CacheStore for RedisCacheStore {
    fn supports_tags(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, RepoError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = cmd("GET").arg(self.key(key)).query_async(&mut conn).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(|err| RepoError::serialization("cached value", err)))
            .transpose()
    }

    async fn put(&self, key: &str, value: Value, lifetime: CacheLifetime) -> Result<(), RepoError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&value).map_err(|err| RepoError::serialization("cached value", err))?;
        let mut command = cmd("SET");
        command.arg(self.key(key)).arg(payload);
        if let CacheLifetime::Seconds(seconds) = lifetime {
            command.arg("EX").arg(seconds);
        }
        let _: () = command.query_async(&mut conn).await?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool, RepoError> {
        let mut conn = self.conn.clone();
        let removed: i64 = cmd("DEL").arg(self.key(key)).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn put_tagged(&self, tag: &str, key: &str, value: Value, lifetime: CacheLifetime) -> Result<(), RepoError> {
        self.put(key, value, lifetime).await?;
        let mut conn = self.conn.clone();
        let _: i64 = cmd("SADD")
            .arg(self.tag_key(tag))
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn flush_tag(&self, tag: &str) -> Result<(), RepoError> {
        let mut conn = self.conn.clone();
        let tag_key = self.tag_key(tag);
        let keys: Vec<String> = cmd("SMEMBERS").arg(&tag_key).query_async(&mut conn).await?;
        if !keys.is_empty() {
            let _: i64 = cmd("DEL").arg(&keys).query_async(&mut conn).await?;
        }
        let _: i64 = cmd("DEL").arg(&tag_key).query_async(&mut conn).await?;
        log::info!("flushed {} cached entries tagged {tag}", keys.len());
        Ok(())
    }
}

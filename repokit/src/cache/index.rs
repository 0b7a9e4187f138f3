use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::RepoError;

/// JSON side index of cache keys for stores without tag support.
///
/// The document maps a repository class to the `method.hash` suffixes cached
/// for it. Every registration and sweep is an unlocked read-modify-write of the
/// whole file, so concurrent writers (several processes sharing the file) can
/// lose entries. Callers needing that guarantee must serialize access externally.
#[derive(Debug, Clone)]
pub struct KeyIndex {
    path: PathBuf,
}

type IndexDocument = BTreeMap<String, Vec<String>>;

impl KeyIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole index. A missing file is an empty index.
    pub async fn load(&self) -> Result<IndexDocument, RepoError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(IndexDocument::new()),
            Ok(content) => {
                serde_json::from_str(&content).map_err(|err| RepoError::serialization("cache key index", err))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(IndexDocument::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn store(&self, document: &IndexDocument) -> Result<(), RepoError> {
        let content =
            serde_json::to_string(document).map_err(|err| RepoError::serialization("cache key index", err))?;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Records `entry` (a `method.hash` suffix) under `class`.
    pub async fn register(&self, class: &str, entry: &str) -> Result<(), RepoError> {
        let mut document = self.load().await?;
        let entries = document.entry(class.to_string()).or_default();
        if entries.iter().any(|existing| existing == entry) {
            return Ok(());
        }
        entries.push(entry.to_string());
        self.store(&document).await
    }

    pub async fn entries(&self, class: &str) -> Result<Vec<String>, RepoError> {
        Ok(self.load().await?.remove(class).unwrap_or_default())
    }

    /// Drops `forgotten` from the entries recorded under `class`.
    pub async fn discard(&self, class: &str, forgotten: &[String]) -> Result<(), RepoError> {
        let mut document = self.load().await?;
        let Some(entries) = document.get_mut(class) else {
            return Ok(());
        };
        entries.retain(|entry| !forgotten.contains(entry));
        if entries.is_empty() {
            document.remove(class);
        }
        self.store(&document).await
    }
}

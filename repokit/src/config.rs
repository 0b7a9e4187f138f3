//! Repository configuration, usually read from a `repository.toml` file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::RepoError;

/// Configuration shared by every repository built from one context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub criteria: CriteriaSettings,
}

impl RepositoryConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, RepoError> {
        toml::from_str(content).map_err(|err| RepoError::Config {
            message: err.to_string(),
        })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_toml_str(&content)
    }
}

/// Mutations that may trigger a cache flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearOn {
    Create,
    Update,
    Delete,
    Restore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds. `-1` caches forever, `0` or absent disables caching.
    #[serde(default = "default_lifetime")]
    pub lifetime: Option<i64>,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_keys_file")]
    pub keys_file: String,
    #[serde(default = "default_clear_on")]
    pub clear_on: Vec<ClearOn>,
    #[serde(default = "default_skip_param")]
    pub skip_param: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            lifetime: default_lifetime(),
            driver: default_driver(),
            keys_file: default_keys_file(),
            clear_on: default_clear_on(),
            skip_param: default_skip_param(),
        }
    }
}

impl CacheSettings {
    pub fn clears_on(&self, event: ClearOn) -> bool {
        self.clear_on.contains(&event)
    }
}

fn default_true() -> bool {
    true
}

fn default_lifetime() -> Option<i64> {
    Some(3600)
}

fn default_driver() -> String {
    "memory".to_string()
}

fn default_keys_file() -> String {
    "storage/repository-cache-keys.json".to_string()
}

fn default_clear_on() -> Vec<ClearOn> {
    vec![ClearOn::Create, ClearOn::Update, ClearOn::Delete, ClearOn::Restore]
}

fn default_skip_param() -> String {
    "skipCache".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaSettings {
    #[serde(default = "default_accepted_conditions")]
    pub accepted_conditions: Vec<String>,
    #[serde(default)]
    pub params: CriteriaParams,
}

impl Default for CriteriaSettings {
    fn default() -> Self {
        Self {
            accepted_conditions: default_accepted_conditions(),
            params: CriteriaParams::default(),
        }
    }
}

fn default_accepted_conditions() -> Vec<String> {
    vec!["=".to_string(), "like".to_string()]
}

/// Request parameter names understood by `RequestCriteria`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CriteriaParams {
    pub search: String,
    pub search_fields: String,
    pub filter: String,
    pub order_by: String,
    pub sorted_by: String,
    pub with: String,
    pub with_count: String,
    pub search_join: String,
}

impl Default for CriteriaParams {
    fn default() -> Self {
        Self {
            search: "search".to_string(),
            search_fields: "searchFields".to_string(),
            filter: "filter".to_string(),
            order_by: "orderBy".to_string(),
            sorted_by: "sortedBy".to_string(),
            with: "with".to_string(),
            with_count: "withCount".to_string(),
            search_join: "searchJoin".to_string(),
        }
    }
}

//! The repository facade.
//!
//! A [`Repository`] records clauses through [`ClauseRecorder`], then a terminal
//! call takes the recorded clauses (plus any pushed criteria), replays them onto
//! a fresh engine query, runs it through the cache orchestrator and leaves the
//! store empty for the next call.
//!
//! ```ignore
//! let mut users = Repository::new(RepositoryDefinition::new("UserRepository", "users"), context)?;
//! let adults = users.where_("age", ">=", 18).order_by("name", SortOrder::Asc).find_all().await?;
//! ```

mod reads;
mod writes;

pub use writes::AttributeCondition;

use std::future::Future;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    cache::{CacheManager, CacheOrchestrator, CachedCall, KeyIndex, MemoryCacheStore},
    clauses::{ClauseRecorder, ClauseStore},
    config::RepositoryConfig,
    criteria::{Criterion, RequestCriteria, RequestParams},
    errors::RepoError,
    events::{CommitQueue, EntityEvent, EntityEventKind, EventBus},
    fingerprint::FingerprintInput,
    query::{Engine, RecordingQuery, assemble},
    registry::{ModelRegistry, model_name_for_repository},
    types::{ModelSchema, RepositoryIdentity},
};

/// Static description of a repository class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDefinition {
    /// Class name, e.g. `UserRepository`. Prefixes cache keys.
    pub class: String,
    /// Short identifier, e.g. `users`. Prefixes event names and tags cache entries.
    pub id: String,
    /// Model name; derived from `class` when absent.
    pub model: Option<String>,
    /// Fields searchable through request criteria, with their default condition.
    pub searchable: Vec<(String, String)>,
}

impl RepositoryDefinition {
    pub fn new(class: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
            model: None,
            searchable: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_searchable(mut self, field: impl Into<String>, condition: impl Into<String>) -> Self {
        self.searchable.push((field.into(), condition.into()));
        self
    }

    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| model_name_for_repository(&self.class))
    }
}

/// Collaborators handed to every repository.
///
/// Cloning is cheap: the engine, cache stores, event bus, commit queue and
/// registry are all shared handles.
#[derive(Clone)]
pub struct RepositoryContext<E: Engine> {
    pub engine: E,
    pub cache: CacheManager,
    pub events: EventBus,
    pub commit_queue: CommitQueue,
    pub config: RepositoryConfig,
    pub models: ModelRegistry,
    /// Parameters of the current request, if there is one.
    pub request: Option<RequestParams>,
}

impl<E: Engine> RepositoryContext<E> {
    /// A context with default configuration and a tag-aware in-memory cache
    /// registered as the `memory` driver.
    pub fn new(engine: E, models: ModelRegistry) -> Self {
        Self {
            engine,
            cache: CacheManager::new().with_store("memory", MemoryCacheStore::tagged()),
            events: EventBus::new(),
            commit_queue: CommitQueue::new(),
            config: RepositoryConfig::default(),
            models,
            request: None,
        }
    }

    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_request(mut self, request: RequestParams) -> Self {
        self.request = Some(request);
        self
    }
}

pub struct Repository<E: Engine> {
    definition: RepositoryDefinition,
    identity: RepositoryIdentity,
    model: ModelSchema,
    context: RepositoryContext<E>,
    cache: CacheOrchestrator,
    clauses: ClauseStore,
    criteria: Vec<Box<dyn Criterion>>,
    skip_criteria: bool,
    cache_lifetime: Option<i64>,
    cache_driver: String,
    cache_clear_enabled: bool,
    skip_cache: bool,
}

impl<E: Engine> std::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("identity", &self.identity)
            .field("model", &self.model.name)
            .field("clauses", &self.clauses)
            .field("criteria", &self.criteria.iter().map(|c| c.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl<E: Engine> ClauseRecorder for Repository<E> {
    fn clause_store(&mut self) -> &mut ClauseStore {
        &mut self.clauses
    }
}

const TRUTHY: [&str; 4] = ["1", "true", "yes", "on"];

impl<E: Engine> Repository<E> {
    /// Resolves the model and wires the cache orchestrator.
    ///
    /// Fails with `UnresolvedModelClass` when the model is not registered.
    pub fn new(definition: RepositoryDefinition, context: RepositoryContext<E>) -> Result<Self, RepoError> {
        let model = context.models.resolve(definition.model_name())?;
        let identity = RepositoryIdentity::new(definition.id.clone(), definition.class.clone());
        let settings = &context.config.cache;
        let cache = CacheOrchestrator::new(context.cache.clone(), KeyIndex::new(settings.keys_file.clone()));
        log::debug!("repository {} bound to model {}", identity.class, model.name);
        Ok(Self {
            cache_lifetime: settings.lifetime,
            cache_driver: settings.driver.clone(),
            definition,
            identity,
            model,
            cache,
            clauses: ClauseStore::new(),
            criteria: Vec::new(),
            skip_criteria: false,
            cache_clear_enabled: true,
            skip_cache: false,
            context,
        })
    }

    pub fn identity(&self) -> &RepositoryIdentity {
        &self.identity
    }

    pub fn definition(&self) -> &RepositoryDefinition {
        &self.definition
    }

    pub fn model(&self) -> &ModelSchema {
        &self.model
    }

    pub fn context(&self) -> &RepositoryContext<E> {
        &self.context
    }

    /// Clauses recorded since the last terminal call.
    pub fn clauses(&self) -> &ClauseStore {
        &self.clauses
    }

    /// Drops recorded clauses and pushed criteria.
    pub fn reset(&mut self) {
        self.clauses.reset();
        self.criteria.clear();
        self.skip_criteria = false;
    }

    /// Records a local scope the model declares.
    ///
    /// Shadows [`ClauseRecorder::scope`] so that undeclared scopes are
    /// rejected here instead of at execution time.
    pub fn scope(&mut self, name: impl Into<String>, args: Vec<Value>) -> Result<&mut Self, RepoError> {
        let name = name.into();
        if !self.model.has_scope(&name) {
            return Err(RepoError::InvalidRequest {
                message: format!("method [{name}] does not exist on model [{}]", self.model.name),
            });
        }
        self.clauses.scope(name, args);
        Ok(self)
    }

    // ---- criteria ---------------------------------------------------------

    pub fn push_criterion(&mut self, criterion: impl Criterion + 'static) -> &mut Self {
        self.criteria.push(Box::new(criterion));
        self
    }

    /// Removes every pushed criterion named `name`.
    pub fn pop_criterion(&mut self, name: &str) -> &mut Self {
        self.criteria.retain(|criterion| criterion.name() != name);
        self
    }

    pub fn criteria(&self) -> impl Iterator<Item = &dyn Criterion> {
        self.criteria.iter().map(|criterion| criterion.as_ref())
    }

    /// Skips pushed criteria for the next terminal call.
    pub fn skip_criteria(&mut self, skip: bool) -> &mut Self {
        self.skip_criteria = skip;
        self
    }

    /// Pushes a [`RequestCriteria`] built from the context's request. Without a request this is a no-op.
    pub fn push_request_criteria(&mut self) -> &mut Self {
        let Some(params) = self.context.request.clone() else {
            log::debug!("{}: no request bound, skipping request criteria", self.identity.class);
            return self;
        };
        let criterion = RequestCriteria::new(
            params,
            self.context.config.criteria.clone(),
            self.definition.searchable.clone(),
        );
        self.push_criterion(criterion)
    }

    // ---- cache controls ---------------------------------------------------

    /// Lifetime in seconds for subsequent calls. `-1` caches forever, `None` or `0` disables caching.
    pub fn set_cache_lifetime(&mut self, lifetime: Option<i64>) -> &mut Self {
        self.cache_lifetime = lifetime;
        self
    }

    pub fn set_cache_driver(&mut self, driver: impl Into<String>) -> &mut Self {
        self.cache_driver = driver.into();
        self
    }

    pub fn enable_cache_clear(&mut self, enabled: bool) -> &mut Self {
        self.cache_clear_enabled = enabled;
        self
    }

    pub fn skip_cache(&mut self, skip: bool) -> &mut Self {
        self.skip_cache = skip;
        self
    }

    /// Flushes every entry cached for this repository.
    pub async fn forget_cache(&self) -> Result<(), RepoError> {
        self.cache
            .flush(&self.identity.class, &self.identity.id, &self.cache_driver)
            .await?;
        self.context.events.dispatch(&EntityEvent::new(
            self.identity.clone(),
            EntityEventKind::CacheFlushed,
            Value::Null,
        ));
        Ok(())
    }

    /// Whether the request asked to bypass the cache. A missing request counts as no.
    fn request_skips_cache(&self) -> bool {
        let param = &self.context.config.cache.skip_param;
        self.context
            .request
            .as_ref()
            .and_then(|params| params.get(param))
            .is_some_and(|value| TRUTHY.contains(&value.trim().to_ascii_lowercase().as_str()))
    }

    fn bypass_cache(&self) -> bool {
        !self.context.config.cache.enabled || self.skip_cache || self.request_skips_cache()
    }

    // ---- preparation ------------------------------------------------------

    /// Folds pushed criteria into `store`.
    fn apply_criteria(&self, store: &mut ClauseStore) -> Result<(), RepoError> {
        if self.skip_criteria {
            return Ok(());
        }
        for criterion in &self.criteria {
            log::debug!("{}: applying criterion {}", self.identity.class, criterion.name());
            criterion.apply(store, &self.model)?;
        }
        Ok(())
    }

    /// Takes the recorded clauses, applies criteria and assembles the engine query.
    ///
    /// The repository is reset before anything can fail, so an error never
    /// leaks clauses into the next call.
    fn prepare(&mut self) -> Result<(ClauseStore, E::Query), RepoError> {
        let mut clauses = self.clauses.take();
        let applied = self.apply_criteria(&mut clauses);
        self.reset();
        applied?;
        let query = assemble(&clauses, self.context.engine.query(&self.model)?);
        Ok((clauses, query))
    }

    /// Runs a terminal read through the cache orchestrator.
    async fn cached<T, F, Fut>(&mut self, method: &str, args: Value, run: F) -> Result<T, RepoError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(E, E::Query) -> Fut,
        Fut: Future<Output = Result<T, RepoError>>,
    {
        let (clauses, query) = self.prepare()?;
        let engine = self.context.engine.clone();
        let call = CachedCall {
            class: &self.identity.class,
            method,
            tag: &self.identity.id,
            bypass: self.bypass_cache(),
            input: FingerprintInput {
                args: &args,
                repository_id: &self.identity.id,
                model: &self.model.name,
                cache_driver: &self.cache_driver,
                cache_lifetime: self.cache_lifetime,
                clauses: &clauses,
            },
        };
        self.cache.execute(call, move || run(engine, query)).await
    }

    /// Replays the recorded clauses and criteria onto a [`RecordingQuery`]
    /// without executing or resetting anything.
    pub fn explain(&self) -> Result<RecordingQuery, RepoError> {
        let mut clauses = self.clauses.clone();
        self.apply_criteria(&mut clauses)?;
        Ok(assemble(&clauses, RecordingQuery::new()))
    }
}

/// Key rendered for error messages: strings bare, everything else as JSON.
fn display_key(value: &Value) -> String {
    match value {
        Value::String(key) => key.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        criteria::{LimitCriteria, WhereCriteria},
        memory::MemoryEngine,
    };

    fn repository() -> Repository<MemoryEngine> {
        let models = ModelRegistry::new().with_model(
            ModelSchema::new("User", "users")
                .with_fillable(["name", "age"])
                .with_scope("adults"),
        );
        let context = RepositoryContext::new(MemoryEngine::new(models.clone()), models);
        Repository::new(RepositoryDefinition::new("UserRepository", "users"), context).unwrap()
    }

    #[test]
    fn model_defaults_from_class_name() {
        assert_eq!(RepositoryDefinition::new("UserRepository", "users").model_name(), "User");
        let explicit = RepositoryDefinition::new("Accounts", "accounts").with_model("User");
        assert_eq!(explicit.model_name(), "User");
    }

    #[test]
    fn unknown_model_is_rejected() {
        let models = ModelRegistry::new();
        let context = RepositoryContext::new(MemoryEngine::new(models.clone()), models);
        let err = Repository::new(RepositoryDefinition::new("GhostRepository", "ghosts"), context).unwrap_err();
        assert!(matches!(err, RepoError::UnresolvedModelClass { model } if model == "Ghost"));
    }

    #[test]
    fn undeclared_scope_is_rejected() {
        let mut repo = repository();
        assert!(repo.scope("adults", vec![]).is_ok());
        assert!(matches!(repo.scope("admins", vec![]), Err(RepoError::InvalidRequest { .. })));
        assert_eq!(repo.clauses().scopes.len(), 1);
    }

    #[test]
    fn explain_includes_criteria_without_resetting() {
        let mut repo = repository();
        repo.where_("age", ">", 24);
        repo.push_criterion(LimitCriteria(2));
        let methods = repo.explain().unwrap().methods();
        assert_eq!(methods, vec!["where", "limit"]);
        assert_eq!(repo.clauses().where_.len(), 1);
        assert_eq!(repo.criteria().count(), 1);
    }

    #[test]
    fn pop_criterion_removes_by_name() {
        let mut repo = repository();
        repo.push_criterion(WhereCriteria::new("age", ">", 1))
            .push_criterion(LimitCriteria(3))
            .pop_criterion("where");
        let names: Vec<&str> = repo.criteria().map(|c| c.name()).collect();
        assert_eq!(names, vec!["limit"]);
    }

    #[test]
    fn prepare_resets_store_and_criteria() {
        let mut repo = repository();
        repo.where_("age", ">", 24).push_criterion(LimitCriteria(1));
        let (clauses, _) = repo.prepare().unwrap();
        assert_eq!(clauses.limit, Some(1));
        assert!(repo.clauses().is_empty());
        assert_eq!(repo.criteria().count(), 0);
    }

    #[test]
    fn skip_param_in_request_bypasses_cache() {
        let mut repo = repository();
        assert!(!repo.bypass_cache());
        repo.context.request = Some([("skipCache".to_string(), "true".to_string())].into());
        assert!(repo.bypass_cache());
        repo.context.request = Some([("skipCache".to_string(), "0".to_string())].into());
        assert!(!repo.bypass_cache());
        repo.skip_cache(true);
        assert!(repo.bypass_cache());
    }
}

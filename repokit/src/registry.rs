//! Model lookup by name.
//!
//! Repositories resolve their model through a [`ModelRegistry`] handed to them by
//! the [`RepositoryContext`](crate::repository::RepositoryContext). Models can be
//! registered explicitly, or submitted at link time through `inventory`:
//!
//! ```ignore
//! fn user_schema() -> ModelSchema {
//!     ModelSchema::new("User", "users").with_fillable(["name", "age"])
//! }
//!
//! inventory::submit! { ModelRegistration { name: "User", schema_fn: user_schema } }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::{errors::RepoError, types::ModelSchema};

/// Link-time model registration collected with `inventory`.
pub struct ModelRegistration {
    /// Model name, e.g. `"User"`.
    pub name: &'static str,
    pub schema_fn: fn() -> ModelSchema,
}

inventory::collect!(ModelRegistration);

pub fn registered_models() -> impl Iterator<Item = &'static ModelRegistration> {
    inventory::iter::<ModelRegistration>()
}

/// Shared, cloneable map of model name to schema.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Arc<RwLock<HashMap<String, ModelSchema>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from every `ModelRegistration` linked into the binary.
    pub fn from_inventory() -> Self {
        let registry = Self::new();
        for registration in registered_models() {
            registry.register((registration.schema_fn)());
        }
        registry
    }

    pub fn register(&self, schema: ModelSchema) {
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        models.insert(schema.name.clone(), schema);
    }

    pub fn with_model(self, schema: ModelSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, name: &str) -> Option<ModelSchema> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        models.get(name).cloned()
    }

    pub fn get_by_table(&self, table: &str) -> Option<ModelSchema> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        models.values().find(|schema| schema.table == table).cloned()
    }

    pub fn resolve(&self, name: &str) -> Result<ModelSchema, RepoError> {
        self.get(name).ok_or_else(|| RepoError::UnresolvedModelClass { model: name.to_string() })
    }
}

/// Default model name for a repository class: `UserRepository` resolves to `User`.
pub fn model_name_for_repository(class: &str) -> &str {
    let short = class.rsplit(['\\', ':']).next().unwrap_or(class);
    short.strip_suffix("Repository").filter(|name| !name.is_empty()).unwrap_or(short)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_schema() -> ModelSchema {
        ModelSchema::new("Post", "posts").with_fillable(["title"])
    }

    inventory::submit! {
        ModelRegistration { name: "Post", schema_fn: post_schema }
    }

    #[test]
    fn resolve_unknown_model_fails() {
        let registry = ModelRegistry::new();
        let err = registry.resolve("Ghost").unwrap_err();
        assert!(matches!(err, RepoError::UnresolvedModelClass { model } if model == "Ghost"));
    }

    #[test]
    fn inventory_registrations_are_collected() {
        let registry = ModelRegistry::from_inventory();
        let schema = registry.resolve("Post").unwrap();
        assert_eq!(schema.table, "posts");
        assert_eq!(registry.get_by_table("posts").map(|s| s.name), Some("Post".to_string()));
    }

    #[test]
    fn model_name_is_derived_from_repository_class() {
        assert_eq!(model_name_for_repository("UserRepository"), "User");
        assert_eq!(model_name_for_repository("App::Repositories::PostRepository"), "Post");
        assert_eq!(model_name_for_repository("Repository"), "Repository");
        assert_eq!(model_name_for_repository("Users"), "Users");
    }
}

//! Shared fixtures: users, posts, tags and profiles over the in-memory engine.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use repokit::{
    CacheManager, EntityEvent, ListenerScope, MemoryCacheStore, MemoryEngine, ModelRegistry, ModelSchema,
    RelationDef, Repository, RepositoryConfig, RepositoryContext, RepositoryDefinition, Row,
};
use serde_json::{Value, json};
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

pub fn user_schema() -> ModelSchema {
    ModelSchema::new("User", "users")
        .with_fillable(["name", "age", "team_id"])
        .with_relation(RelationDef::has_many("posts", "Post", "user_id"))
        .with_relation(RelationDef::belongs_to_many("tags", "Tag", "tag_user", "user_id", "tag_id"))
        .with_relation(RelationDef::has_one("profile", "Profile", "user_id"))
        .with_relation(RelationDef::belongs_to("team", "Team", "team_id"))
        .with_relation(RelationDef::morph_many("comments", "Comment", "commentable"))
        .with_scope("older_than")
        .with_soft_deletes()
}

pub fn post_schema() -> ModelSchema {
    ModelSchema::new("Post", "posts")
        .with_fillable(["title", "user_id"])
        .with_relation(RelationDef::belongs_to("author", "User", "user_id"))
}

pub fn tag_schema() -> ModelSchema {
    ModelSchema::new("Tag", "tags").with_fillable(["label"])
}

pub fn profile_schema() -> ModelSchema {
    ModelSchema::new("Profile", "profiles").with_fillable(["bio", "user_id"])
}

pub fn team_schema() -> ModelSchema {
    ModelSchema::new("Team", "teams").with_fillable(["title"])
}

pub fn comment_schema() -> ModelSchema {
    ModelSchema::new("Comment", "comments").with_fillable(["body"])
}

pub fn models() -> ModelRegistry {
    ModelRegistry::new()
        .with_model(user_schema())
        .with_model(post_schema())
        .with_model(tag_schema())
        .with_model(profile_schema())
        .with_model(team_schema())
        .with_model(comment_schema())
}

/// Four users aged 24, 26, 28 and 25; `evsign` appears twice.
pub fn seeded_engine() -> MemoryEngine {
    let engine = MemoryEngine::new(models());
    engine.seed(
        "users",
        [
            row(json!({"name": "evsign", "age": 24, "created_at": "2024-01-01 10:00:00"})),
            row(json!({"name": "omranic", "age": 26, "created_at": "2024-02-01 10:00:00"})),
            row(json!({"name": "ionut", "age": 28, "created_at": "2024-03-01 10:00:00"})),
            row(json!({"name": "evsign", "age": 25, "created_at": "2024-04-01 10:00:00"})),
        ],
    );
    engine.seed(
        "posts",
        [
            row(json!({"title": "first", "user_id": 1})),
            row(json!({"title": "second", "user_id": 1})),
            row(json!({"title": "third", "user_id": 2})),
        ],
    );
    engine.seed("tags", [row(json!({"label": "rust"})), row(json!({"label": "go"})), row(json!({"label": "lua"}))]);
    engine.define_scope("User", "older_than", |args: &[Value]| {
        repokit::Conditions::new().where_("age", ">", args.first().cloned().unwrap_or(Value::from(0)))
    });
    engine
}

/// A repository fixture; keeps the key-index directory alive for the test's duration.
pub struct Fixture {
    pub engine: MemoryEngine,
    pub context: RepositoryContext<MemoryEngine>,
    pub events: Arc<Mutex<Vec<String>>>,
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(MemoryCacheStore::tagged())
    }

    pub fn with_store(store: MemoryCacheStore) -> Self {
        init_logging();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = RepositoryConfig::default();
        config.cache.keys_file = dir.path().join("cache-keys.json").to_string_lossy().into_owned();
        let engine = seeded_engine();
        let context = RepositoryContext::new(engine.clone(), models())
            .with_cache(CacheManager::new().with_store("memory", store))
            .with_config(config);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        context.events.subscribe(ListenerScope::Any, None, move |event: &EntityEvent| {
            sink.lock().unwrap().push(event.name());
        });
        Self {
            engine,
            context,
            events,
            dir,
        }
    }

    pub fn users(&self) -> Repository<MemoryEngine> {
        Repository::new(RepositoryDefinition::new("UserRepository", "users"), self.context.clone())
            .expect("user repository")
    }

    pub fn posts(&self) -> Repository<MemoryEngine> {
        Repository::new(RepositoryDefinition::new("PostRepository", "posts"), self.context.clone())
            .expect("post repository")
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }
}

pub fn names(entities: &[repokit::Entity]) -> Vec<String> {
    entities
        .iter()
        .map(|entity| entity.get("name").and_then(Value::as_str).unwrap_or_default().to_string())
        .collect()
}

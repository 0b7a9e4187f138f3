//! Writes, lifecycle events and transaction-deferred delivery.

mod support;

use std::sync::{Arc, Mutex};

use repokit::{ClauseRecorder, EntityEventKind, ListenerScope, RepoError, RepositoryConfig};
use serde_json::{Value, json};
use support::{Fixture, names, row};

fn condition(column: &str, value: Value) -> (String, String, Value) {
    (column.to_string(), "=".to_string(), value)
}

#[tokio::test]
async fn create_update_delete_restore_emit_named_events() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let user = users.create(&row(json!({"name": "x", "age": 40, "is_admin": true})), false).await.unwrap();
    assert_eq!(user.get("id"), Some(&json!(5)));
    assert!(user.get("is_admin").is_none());

    let updated = users.update(5, &row(json!({"age": 41})), false).await.unwrap();
    assert_eq!(updated.get("age"), Some(&json!(41)));

    let deleted = users.delete(5).await.unwrap().unwrap();
    assert_eq!(deleted.get("name"), Some(&json!("x")));
    assert!(users.find(5).await.unwrap().is_none());

    let restored = users.restore(5).await.unwrap().unwrap();
    assert!(restored.get("deleted_at").is_none());
    assert_eq!(users.count().await.unwrap(), 5);

    let lifecycle: Vec<String> = fx.events().into_iter().filter(|name| !name.ends_with("cache.flushed")).collect();
    assert_eq!(
        lifecycle,
        vec![
            "users.entity.creating",
            "users.entity.created",
            "users.entity.updating",
            "users.entity.updated",
            "users.entity.deleting",
            "users.entity.deleted",
            "users.entity.restoring",
            "users.entity.restored",
        ]
    );
}

#[tokio::test]
async fn missing_rows() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let err = users.update(99, &row(json!({"age": 1})), false).await.unwrap_err();
    assert!(matches!(err, RepoError::EntityNotFound { .. }));
    assert!(users.delete(99).await.unwrap().is_none());
    assert!(users.restore(99).await.unwrap().is_none());
}

#[tokio::test]
async fn store_and_find_or_new() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let created = users.store(None, &row(json!({"name": "s", "age": 1})), false).await.unwrap();
    assert_eq!(created.get("id"), Some(&json!(5)));
    let updated = users.store(Some(json!(5)), &row(json!({"age": 2})), false).await.unwrap();
    assert_eq!(updated.get("age"), Some(&json!(2)));

    let existing = users.find_or_new(1, &row(json!({"name": "unused"})), false).await.unwrap();
    assert_eq!(existing.get("name"), Some(&json!("evsign")));
    let fresh = users.find_or_new(77, &row(json!({"name": "fresh"})), false).await.unwrap();
    assert_eq!(fresh.get("id"), Some(&json!(6)));
}

#[tokio::test]
async fn update_or_create_and_update_or_insert() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let both = users
        .update_or_create(&[condition("name", json!("evsign"))], &row(json!({"age": 30})), false)
        .await
        .unwrap();
    assert_eq!(both.len(), 2);
    assert!(both.iter().all(|user| user.get("age") == Some(&json!(30))));

    let created = users
        .update_or_create(&[condition("name", json!("newcomer"))], &row(json!({"age": 19})), false)
        .await
        .unwrap();
    assert_eq!(created[0].get("name"), Some(&json!("newcomer")));
    assert_eq!(created[0].get("age"), Some(&json!(19)));

    assert!(
        users
            .update_or_insert(&[condition("name", json!("ionut"))], &row(json!({"age": 29})))
            .await
            .unwrap()
    );
    assert_eq!(users.find_by("name", "ionut").await.unwrap().unwrap().get("age"), Some(&json!(29)));

    assert!(
        users
            .update_or_insert(&[condition("name", json!("raw"))], &row(json!({"age": 5})))
            .await
            .unwrap()
    );
    let raw = users.find_by("name", "raw").await.unwrap().unwrap();
    assert!(raw.get("created_at").is_none());
}

#[tokio::test]
async fn bulk_writes_use_recorded_clauses() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let affected = users.where_("name", "=", "evsign").update_set(&row(json!({"age": 18})), false).await.unwrap();
    assert_eq!(affected, 2);
    assert_eq!(users.find_where("age", "=", 18).await.unwrap().len(), 2);

    assert!(users.where_("age", "=", 18).deletes().await.unwrap());
    assert_eq!(users.count().await.unwrap(), 2);
    assert!(!users.where_("age", "=", 18).deletes().await.unwrap());

    assert_eq!(users.deletes_by("name", ["ionut", "nobody"]).await.unwrap(), 1);
    assert_eq!(names(&users.find_all().await.unwrap()), vec!["omranic"]);

    assert!(users.insert(vec![row(json!({"name": "bulk", "age": 3}))]).await.unwrap());
    assert_eq!(users.count().await.unwrap(), 2);
}

#[tokio::test]
async fn events_wait_for_the_outermost_commit() {
    let fx = Fixture::new();
    let mut users = fx.users();

    users.begin_transaction().await.unwrap();
    users.create(&row(json!({"name": "a"})), false).await.unwrap();
    users.begin_transaction().await.unwrap();
    users.create(&row(json!({"name": "b"})), false).await.unwrap();
    users.commit().await.unwrap();
    assert!(!fx.events().contains(&"users.entity.created".to_string()));
    assert!(fx.events().contains(&"users.entity.creating".to_string()));

    users.commit().await.unwrap();
    let created = fx.events().iter().filter(|name| *name == "users.entity.created").count();
    assert_eq!(created, 2);
    assert!(fx.context.commit_queue.is_empty());
}

#[tokio::test]
async fn rollback_drops_queued_events_and_rows() {
    let fx = Fixture::new();
    let mut users = fx.users();

    users.begin_transaction().await.unwrap();
    users.create(&row(json!({"name": "a"})), false).await.unwrap();
    users.begin_transaction().await.unwrap();
    users.create(&row(json!({"name": "b"})), false).await.unwrap();
    users.rollback().await.unwrap();
    users.commit().await.unwrap();

    let created = fx.events().iter().filter(|name| *name == "users.entity.created").count();
    assert_eq!(created, 1);
    let all = users.find_all().await.unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all[4].get("name"), Some(&json!("a")));
}

#[tokio::test]
async fn writes_inside_a_transaction_flush_and_rollback_flushes_again() {
    let fx = Fixture::new();
    let mut users = fx.users();

    assert_eq!(users.find_all().await.unwrap().len(), 4);
    users.begin_transaction().await.unwrap();
    users.create(&row(json!({"name": "ghost"})), false).await.unwrap();
    assert_eq!(users.find_all().await.unwrap().len(), 5, "own write visible inside the transaction");
    assert!(!fx.events().contains(&"users.entity.created".to_string()));

    users.rollback().await.unwrap();
    assert_eq!(users.find_all().await.unwrap().len(), 4);
    assert_eq!(users.skip_cache(true).find_all().await.unwrap().len(), 4);
    assert!(fx.context.commit_queue.is_empty());
}

#[tokio::test]
async fn commit_from_another_repository_keeps_a_disabled_cache_clear() {
    let fx = Fixture::new();
    let mut users = fx.users();
    let mut posts = fx.posts();
    users.enable_cache_clear(false);

    users.find_all().await.unwrap();
    posts.begin_transaction().await.unwrap();
    users.create(&row(json!({"name": "quiet"})), false).await.unwrap();
    posts.commit().await.unwrap();

    assert!(fx.events().contains(&"users.entity.created".to_string()));
    assert!(!fx.events().contains(&"users.entity.cache.flushed".to_string()));
    assert_eq!(users.find_all().await.unwrap().len(), 4);
}

#[tokio::test]
async fn listeners_can_scope_to_one_repository_and_kind() {
    let fx = Fixture::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    fx.context
        .events
        .subscribe(ListenerScope::Repository("posts".into()), Some(EntityEventKind::Created), move |event| {
            sink.lock().unwrap().push(event.payload.clone());
        });

    fx.users().create(&row(json!({"name": "u"})), false).await.unwrap();
    fx.posts().create(&row(json!({"title": "t", "user_id": 1})), false).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("title"), Some(&json!("t")));
}

#[test]
fn configuration_parses_from_toml() {
    let config = RepositoryConfig::from_toml_str(
        r#"
        [cache]
        lifetime = -1
        driver = "redis"
        clear_on = ["delete"]

        [criteria]
        accepted_conditions = ["=", "like", "in"]
        [criteria.params]
        search = "q"
        "#,
    )
    .unwrap();
    assert!(config.cache.enabled);
    assert_eq!(config.cache.lifetime, Some(-1));
    assert!(config.cache.clears_on(repokit::ClearOn::Delete));
    assert!(!config.cache.clears_on(repokit::ClearOn::Create));
    assert_eq!(config.criteria.params.search, "q");
    assert_eq!(config.criteria.params.order_by, "orderBy");
    assert!(matches!(RepositoryConfig::from_toml_str("cache = 3"), Err(RepoError::Config { .. })));
}

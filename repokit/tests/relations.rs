//! Nested relation writes through `create` and `update`.

mod support;

use repokit::{ModelSchema, RelationDef, RelationKind, RepoError, Row, extract_relations};
use serde_json::{Value, json};
use support::{Fixture, row};

fn pivot_tags(fx: &Fixture, user_id: i64) -> Vec<i64> {
    let mut tags: Vec<i64> = fx
        .engine
        .rows("tag_user")
        .iter()
        .filter(|pivot| pivot.get("user_id") == Some(&json!(user_id)))
        .filter_map(|pivot| pivot.get("tag_id").and_then(Value::as_i64))
        .collect();
    tags.sort_unstable();
    tags
}

fn position(events: &[String], name: &str) -> usize {
    events
        .iter()
        .position(|event| event == name)
        .unwrap_or_else(|| panic!("{name} not dispatched: {events:?}"))
}

#[test]
fn relation_payloads_are_split_from_fillable_attributes() {
    let schema = ModelSchema::new("User", "users")
        .with_fillable(["name"])
        .with_relation(RelationDef::belongs_to_many("tags", "Tag", "tag_user", "user_id", "tag_id"));
    let (relations, plain) = extract_relations(&schema, &row(json!({"name": "x", "tags": [1, 2, 3]})));

    assert_eq!(relations.len(), 1);
    assert_eq!(relations["tags"].values, json!([1, 2, 3]));
    assert_eq!(relations["tags"].kind, RelationKind::BelongsToMany);
    assert_eq!(plain, row(json!({"name": "x"})));
}

#[tokio::test]
async fn create_writes_every_supported_relation_kind() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let attributes: Row = row(json!({
        "name": "nested",
        "age": 33,
        "tags": [1, {"id": 2}],
        "posts": [{"title": "hello"}, {"title": "again"}],
        "profile": {"bio": "writes rust"},
        "team": {"title": "core"},
    }));
    let user = users.create(&attributes, true).await.unwrap();
    let id = user.get("id").and_then(Value::as_i64).unwrap();

    assert_eq!(pivot_tags(&fx, id), vec![1, 2]);
    let posts: Vec<Row> = fx
        .engine
        .rows("posts")
        .into_iter()
        .filter(|post| post.get("user_id") == Some(&json!(id)))
        .collect();
    assert_eq!(posts.len(), 2);
    let profiles = fx.engine.rows("profiles");
    assert_eq!(profiles[0].get("user_id"), Some(&json!(id)));
    let teams = fx.engine.rows("teams");
    assert_eq!(user.get("team_id"), teams[0].get("id"));

    let events = fx.events();
    let created = position(&events, "users.entity.created");
    assert!(position(&events, "users.entity.creating") < created);
    assert!(position(&events, "tags.entity.updated") < created);
    assert!(position(&events, "posts.entity.created") < created);
    assert!(position(&events, "profiles.entity.created") < created);
    assert!(position(&events, "teams.entity.created") < created);
}

#[tokio::test]
async fn relations_are_ignored_without_sync() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let user = users
        .create(&row(json!({"name": "plain", "tags": [1]})), false)
        .await
        .unwrap();
    assert!(pivot_tags(&fx, user.get("id").and_then(Value::as_i64).unwrap()).is_empty());

    fx.clear_events();
    users.update(1, &row(json!({"tags": [3]})), false).await.unwrap();
    assert!(!fx.events().contains(&"users.entity.updated".to_string()));
}

#[tokio::test]
async fn update_replaces_pivot_membership_and_fires_updated() {
    let fx = Fixture::new();
    let mut users = fx.users();
    users.update(1, &row(json!({"tags": [1, 2]})), true).await.unwrap();
    assert_eq!(pivot_tags(&fx, 1), vec![1, 2]);

    fx.clear_events();
    users.update(1, &row(json!({"tags": [2, 3]})), true).await.unwrap();
    assert_eq!(pivot_tags(&fx, 1), vec![2, 3]);
    let events = fx.events();
    assert!(events.contains(&"tags.entity.updated".to_string()));
    assert!(events.contains(&"users.entity.updated".to_string()));
}

#[tokio::test]
async fn update_targets_existing_children() {
    let fx = Fixture::new();
    let mut users = fx.users();

    users
        .update(1, &row(json!({"posts": [{"id": 2, "title": "renamed"}]})), true)
        .await
        .unwrap();
    let titles: Vec<Value> = fx.engine.rows("posts").iter().filter_map(|p| p.get("title").cloned()).collect();
    assert_eq!(titles, vec![json!("first"), json!("renamed"), json!("third")]);

    users.update(2, &row(json!({"posts": {"title": "all"}})), true).await.unwrap();
    assert_eq!(fx.engine.rows("posts")[2].get("title"), Some(&json!("all")));
}

#[tokio::test]
async fn unchanged_update_fires_nothing() {
    let fx = Fixture::new();
    let mut users = fx.users();
    fx.clear_events();

    users.update(1, &row(json!({"name": "evsign"})), true).await.unwrap();
    let events = fx.events();
    assert!(events.contains(&"users.entity.updating".to_string()));
    assert!(!events.contains(&"users.entity.updated".to_string()));
}

#[tokio::test]
async fn unsupported_kind_fails_the_write_and_rollback_undoes_it() {
    let fx = Fixture::new();
    let mut users = fx.users();

    users.begin_transaction().await.unwrap();
    let err = users
        .create(&row(json!({"name": "c", "comments": [{"body": "hi"}]})), true)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::UnsupportedRelationKind { ref accessor, .. } if accessor == "comments"));
    users.rollback().await.unwrap();

    assert_eq!(fx.engine.rows("users").len(), 4);
    assert!(!fx.events().contains(&"users.entity.created".to_string()));
}

//! End-to-end reads through the repository facade.

mod support;

use repokit::{ClauseRecorder, Conditions, RepoError, SortOrder};
use serde_json::json;
use support::{Fixture, names};

#[tokio::test]
async fn group_by_with_having_returns_one_row_per_name() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let found = users.group_by(["name"]).having("age", ">", 24).find_all().await.unwrap();
    assert_eq!(found.len(), 3);
    let mut ages: Vec<i64> = found.iter().filter_map(|u| u.get("age").and_then(|a| a.as_i64())).collect();
    ages.sort_unstable();
    assert_eq!(ages, vec![25, 26, 28]);
    assert!(users.clauses().is_empty());
}

#[tokio::test]
async fn aggregates_over_all_rows() {
    let fx = Fixture::new();
    let mut users = fx.users();

    assert_eq!(users.min("age").await.unwrap(), Some(24.0));
    assert_eq!(users.max("age").await.unwrap(), Some(28.0));
    assert_eq!(users.avg("age").await.unwrap(), Some(25.75));
    assert_eq!(users.sum("age").await.unwrap(), 103.0);
    assert_eq!(users.count().await.unwrap(), 4);
}

#[tokio::test]
async fn store_is_reset_after_every_terminal_call() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let found = users.find_where_in("name", ["evsign", "ionut"]).await.unwrap();
    assert_eq!(found.len(), 3);
    assert!(users.clauses().is_empty());

    let all = users.find_all().await.unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn finders() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let ionut = users.find(3).await.unwrap().unwrap();
    assert_eq!(ionut.get("name"), Some(&json!("ionut")));
    assert!(users.find(99).await.unwrap().is_none());

    let err = users.find_or_fail(99).await.unwrap_err();
    assert!(matches!(err, RepoError::EntityNotFound { ref model, ref id } if model == "User" && id == "99"));

    assert_eq!(users.find_many([1, 2]).await.unwrap().len(), 2);
    let err = users.find_many_or_fail([1, 42, 43]).await.unwrap_err();
    assert!(matches!(err, RepoError::EntityNotFound { ref id, .. } if id == "42, 43"));

    let by = users.find_by("name", "omranic").await.unwrap().unwrap();
    assert_eq!(by.get("age"), Some(&json!(26)));

    let first = users.first_where("age", ">=", 26).await.unwrap().unwrap();
    assert_eq!(first.get("name"), Some(&json!("omranic")));

    let latest = users.first_latest("created_at").await.unwrap().unwrap();
    assert_eq!(latest.get("age"), Some(&json!(25)));
    let oldest = users.first_oldest("created_at").await.unwrap().unwrap();
    assert_eq!(oldest.get("age"), Some(&json!(24)));

    let first = users.find_first().await.unwrap().unwrap();
    assert_eq!(first.get("id"), Some(&json!(1)));
}

#[tokio::test]
async fn where_filters_and_relation_existence() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let adults = users.find_where("age", ">", 25).await.unwrap();
    assert_eq!(names(&adults), vec!["omranic", "ionut"]);

    let others = users.find_where_not_in("name", ["evsign"]).await.unwrap();
    assert_eq!(others.len(), 2);

    let authors = users.find_where_has("posts", None).await.unwrap();
    assert_eq!(names(&authors), vec!["evsign", "omranic"]);

    let constrained = users
        .find_where_has("posts", Some(Conditions::new().where_("title", "=", "third")))
        .await
        .unwrap();
    assert_eq!(names(&constrained), vec!["omranic"]);

    assert!(users.where_exists_exist("name", "=", "ionut").await.unwrap());
    assert!(!users.where_("age", ">", 90).exists().await.unwrap());
}

#[tokio::test]
async fn ordering_and_pagination() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let page = users.order_by("age", SortOrder::Asc).paginate(3, 2).await.unwrap();
    assert_eq!(page.total, Some(4));
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].get("age"), Some(&json!(28)));
    assert!(!page.has_more());
    assert_eq!(page.last_page(), Some(2));

    let page = users.order_by("age", SortOrder::Asc).simple_paginate(3, 1).await.unwrap();
    assert_eq!(page.items.len(), 3);
    assert!(page.total.is_none());
    assert!(page.has_more());
}

#[tokio::test]
async fn eager_loads_and_counts_are_attached() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let found = users.with(["posts"]).with_count("posts").where_("id", "=", 1).find_all().await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("posts_count"), Some(&json!(2)));
    assert_eq!(found[0].get("posts").and_then(|p| p.as_array()).map(Vec::len), Some(2));

    let mut posts = fx.posts();
    let post = posts.with(["author"]).find(3).await.unwrap().unwrap();
    assert_eq!(post.get("author").and_then(|a| a.get("name")), Some(&json!("omranic")));
}

#[tokio::test]
async fn scopes_must_be_declared() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let older = users.scope("older_than", vec![json!(25)]).unwrap().find_all().await.unwrap();
    assert_eq!(names(&older), vec!["omranic", "ionut"]);

    let err = users.scope("admins", vec![]).unwrap_err();
    assert!(matches!(err, RepoError::InvalidRequest { .. }));
}

#[tokio::test]
async fn raw_fragments_fail_and_still_reset() {
    let fx = Fixture::new();
    let mut users = fx.users();

    let err = users.where_raw("age > ?", vec![json!(1)]).find_all().await.unwrap_err();
    assert!(matches!(err, RepoError::Query { .. }));
    assert!(users.clauses().is_empty());
    assert_eq!(users.find_all().await.unwrap().len(), 4);
}

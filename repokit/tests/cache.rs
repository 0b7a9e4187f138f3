//! Result caching and invalidation through the repository facade.

mod support;

use repokit::{ClauseRecorder, KeyIndex, MemoryCacheStore, RedisCacheStore, CacheManager};
use serde_json::json;
use serial_test::serial;
use support::{Fixture, row};

fn sneak_in_user(fx: &Fixture) {
    fx.engine.seed("users", [row(json!({"name": "ghost", "age": 40}))]);
}

#[tokio::test]
async fn repeated_call_is_served_from_cache_until_a_write_flushes() {
    let fx = Fixture::new();
    let mut users = fx.users();

    assert_eq!(users.find_all().await.unwrap().len(), 4);
    sneak_in_user(&fx);
    assert_eq!(users.find_all().await.unwrap().len(), 4, "served from cache");
    assert_eq!(users.count().await.unwrap(), 5, "different method, different key");

    users.create(&row(json!({"name": "new", "age": 30})), false).await.unwrap();
    assert_eq!(users.find_all().await.unwrap().len(), 6);
    assert!(fx.events().contains(&"users.entity.cache.flushed".to_string()));
}

#[tokio::test]
async fn clauses_and_arguments_are_part_of_the_key() {
    let fx = Fixture::new();
    let mut users = fx.users();

    assert_eq!(users.where_("age", ">", 25).find_all().await.unwrap().len(), 2);
    assert_eq!(users.where_("age", ">", 24).find_all().await.unwrap().len(), 3);
    assert_eq!(users.find(1).await.unwrap().unwrap().get("age"), Some(&json!(24)));
    assert_eq!(users.find(2).await.unwrap().unwrap().get("age"), Some(&json!(26)));
}

#[tokio::test]
async fn skipping_or_disabling_the_cache_reads_through() {
    let fx = Fixture::new();
    let mut users = fx.users();

    users.find_all().await.unwrap();
    sneak_in_user(&fx);
    assert_eq!(users.skip_cache(true).find_all().await.unwrap().len(), 5);
    users.skip_cache(false);
    assert_eq!(users.find_all().await.unwrap().len(), 4);

    assert_eq!(users.set_cache_lifetime(None).find_all().await.unwrap().len(), 5);
    assert_eq!(users.set_cache_lifetime(Some(0)).find_all().await.unwrap().len(), 5);
}

#[tokio::test]
async fn request_skip_parameter_bypasses_the_cache() {
    let mut fx = Fixture::new();
    fx.users().find_all().await.unwrap();
    sneak_in_user(&fx);

    fx.context.request = Some([("skipCache".to_string(), "1".to_string())].into());
    assert_eq!(fx.users().find_all().await.unwrap().len(), 5);
}

#[tokio::test]
async fn disabled_cache_clear_leaves_entries_in_place() {
    let fx = Fixture::new();
    let mut users = fx.users();
    users.enable_cache_clear(false);

    users.find_all().await.unwrap();
    users.create(&row(json!({"name": "new", "age": 30})), false).await.unwrap();
    assert_eq!(users.find_all().await.unwrap().len(), 4);
    assert!(!fx.events().iter().any(|name| name.ends_with("cache.flushed")));

    users.forget_cache().await.unwrap();
    assert_eq!(users.find_all().await.unwrap().len(), 5);
}

#[tokio::test]
async fn clear_on_limits_which_writes_flush() {
    let mut fx = Fixture::new();
    fx.context.config.cache.clear_on = vec![repokit::ClearOn::Delete];
    let mut users = fx.users();

    users.find_all().await.unwrap();
    users.update(1, &row(json!({"age": 50})), false).await.unwrap();
    let first = users.find_all().await.unwrap();
    assert_eq!(first[0].get("age"), Some(&json!(24)), "update does not flush");

    users.delete(2).await.unwrap();
    let remaining = users.find_all().await.unwrap();
    assert_eq!(remaining.len(), 3);
    assert_eq!(remaining[0].get("age"), Some(&json!(50)));
}

#[tokio::test]
async fn untagged_store_is_swept_through_the_key_index() {
    let fx = Fixture::with_store(MemoryCacheStore::new());
    let mut users = fx.users();

    users.find_all().await.unwrap();
    users.count().await.unwrap();
    let index = KeyIndex::new(fx.context.config.cache.keys_file.clone());
    let document = index.load().await.unwrap();
    let entries = &document["UserRepository"];
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|entry| entry.starts_with("find_all.")));

    users.delete(4).await.unwrap();
    assert!(index.load().await.unwrap().get("UserRepository").is_none_or(|entries| entries.is_empty()));
    assert_eq!(users.find_all().await.unwrap().len(), 3);
}

#[tokio::test]
async fn failed_index_sweep_is_retried_before_serving_from_cache() {
    let store = MemoryCacheStore::new();
    let fx = Fixture::with_store(store.clone());
    let mut users = fx.users();

    assert_eq!(users.find_all().await.unwrap().len(), 4);
    store.set_available(false);
    users.create(&row(json!({"name": "new", "age": 30})), false).await.unwrap();
    let index = KeyIndex::new(fx.context.config.cache.keys_file.clone());
    assert_eq!(index.load().await.unwrap()["UserRepository"].len(), 1, "unforgotten entry stays indexed");

    store.set_available(true);
    assert_eq!(users.find_all().await.unwrap().len(), 5);
    assert_eq!(fx.users().find_all().await.unwrap().len(), 5);
}

#[tokio::test]
async fn restore_flushes_cached_reads() {
    let fx = Fixture::new();
    let mut users = fx.users();

    users.delete(2).await.unwrap();
    assert_eq!(users.find_all().await.unwrap().len(), 3);
    users.restore(2).await.unwrap();
    assert_eq!(users.find_all().await.unwrap().len(), 4);
    assert!(fx.events().contains(&"users.entity.cache.flushed".to_string()));
}

#[tokio::test]
async fn unavailable_store_fails_open() {
    let store = MemoryCacheStore::tagged();
    store.set_available(false);
    let fx = Fixture::with_store(store);
    let mut users = fx.users();

    assert_eq!(users.find_all().await.unwrap().len(), 4);
    sneak_in_user(&fx);
    assert_eq!(users.find_all().await.unwrap().len(), 5);
    users.create(&row(json!({"name": "new", "age": 30})), false).await.unwrap();
    assert!(fx.events().contains(&"users.entity.created".to_string()));
}

#[tokio::test]
async fn unknown_driver_reads_through() {
    let fx = Fixture::new();
    let mut users = fx.users();
    users.set_cache_driver("file");

    users.find_all().await.unwrap();
    sneak_in_user(&fx);
    assert_eq!(users.find_all().await.unwrap().len(), 5);
    assert!(users.forget_cache().await.is_err());
}

#[tokio::test]
#[ignore = "requires a Redis server on 127.0.0.1"]
#[serial]
async fn redis_store_round_trip_and_tag_flush() {
    let store = RedisCacheStore::connect("redis://127.0.0.1/")
        .await
        .unwrap()
        .with_prefix("repokit-test");
    let mut fx = Fixture::new();
    fx.context.cache = CacheManager::new().with_store("redis", store);
    fx.context.config.cache.driver = "redis".to_string();
    let mut users = fx.users();
    users.forget_cache().await.unwrap();

    users.find_all().await.unwrap();
    sneak_in_user(&fx);
    assert_eq!(users.find_all().await.unwrap().len(), 4);
    users.forget_cache().await.unwrap();
    assert_eq!(users.find_all().await.unwrap().len(), 5);
}

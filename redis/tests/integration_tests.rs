//! Integration tests for `RedisStorageDriver` using testcontainers.
//!
//! Docker must be running. Run with
//! `cargo test -p idempotent-request-redis -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code uses expect

use idempotent_request_core::{
    BodyEncoding, Clock, FindOrCreate, IdempotentRecord, RecordStore, RequestIdentity,
    SerializedResponse, StorageDriver, StorageKey,
};
use idempotent_request_redis::RedisStorageDriver;
use idempotent_request_testing::test_clock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;

async fn setup_redis_driver() -> (ContainerAsync<Redis>, RedisStorageDriver) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");

    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get redis port");

    let driver = RedisStorageDriver::new(&format!("redis://127.0.0.1:{port}"))
        .await
        .expect("Failed to connect to redis");
    (container, driver)
}

fn identity() -> RequestIdentity {
    RequestIdentity::new("POST", "/api/hello", "key-1", None)
}

fn storage_key() -> StorageKey {
    StorageKey::new("/api/hello-key-1")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_record_lifecycle_round_trips() {
    let (_container, driver) = setup_redis_driver().await;
    let driver = driver.with_ttl(Duration::from_secs(60));
    let store = RecordStore::new(Arc::new(driver.clone()), Arc::new(test_clock()));

    let FindOrCreate::Created(record) = store
        .find_or_create(identity(), storage_key())
        .await
        .expect("create")
    else {
        unreachable!("empty database");
    };

    let locked = store.acquire_lock(record).await.expect("lock");
    let stored = driver.get(&storage_key()).await.expect("get").expect("locked");
    assert_eq!(stored.locked_at(), Some(test_clock().now()));

    let response = SerializedResponse {
        status: 201,
        status_text: "Created".to_string(),
        headers: BTreeMap::new(),
        body: "created".to_string(),
        body_encoding: BodyEncoding::Utf8,
    };
    store
        .set_response_and_unlock(locked, response.clone())
        .await
        .expect("unlock");

    let stored = driver.get(&storage_key()).await.expect("get").expect("processed");
    assert_eq!(stored.response(), Some(&response));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_insert_if_absent_only_creates_once() {
    let (_container, driver) = setup_redis_driver().await;
    let record = IdempotentRecord::from_parts(identity(), storage_key(), None, None).unwrap();

    assert!(driver.insert_if_absent(record.clone()).await.expect("first insert"));
    assert!(!driver.insert_if_absent(record).await.expect("second insert"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_key_prefix_isolates_namespaces() {
    let (_container, driver) = setup_redis_driver().await;
    let other = driver.clone().with_key_prefix("other:");
    let record = IdempotentRecord::from_parts(identity(), storage_key(), None, None).unwrap();

    driver.save(record).await.expect("save");

    assert!(driver.get(&storage_key()).await.expect("get").is_some());
    assert!(other.get(&storage_key()).await.expect("get").is_none());
}

//! Key-value store integration tests

mod common;

use bson::{doc, Bson};
use tokio_test::{assert_err, assert_ok};

use common::memory_store;
use mongo_datastore::{HandlerRegistry, KvOptions, Query, StoreError};

#[tokio::test]
async fn test_set_get_del_round_trip() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let opts = KvOptions::default();

    assert_eq!(assert_ok!(store.set("a", 5, &opts).await), Bson::Int32(5));
    assert_eq!(assert_ok!(store.get("a", &opts).await), Some(Bson::Int32(5)));

    let deleted = assert_ok!(store.del("a", &opts).await);
    assert_eq!(deleted.count, 1);
    assert_eq!(assert_ok!(store.get("a", &opts).await), None);
}

#[tokio::test]
async fn test_set_overwrites_single_record() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let opts = KvOptions::default();

    store.set("a", 1, &opts).await.unwrap();
    store.set("a", doc! { "nested": true }, &opts).await.unwrap();

    let records = store
        .find_as_array("syskeyvaldata", Query::filter(doc! { "key": "a" }))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get_str("keyspace").unwrap(), "default_keyspace");
    assert_eq!(
        records[0].get("val"),
        Some(&Bson::Document(doc! { "nested": true }))
    );
}

#[tokio::test]
async fn test_counter_scenario() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let opts = KvOptions::default();

    assert_eq!(store.incr("counter", 3, &opts).await.unwrap(), Bson::Int64(3));
    assert_eq!(store.incr("counter", -1, &opts).await.unwrap(), Bson::Int64(2));
}

#[tokio::test]
async fn test_decr_matches_negated_incr() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;

    for n in [-7_i64, -1, 0, 1, 42, i64::MAX] {
        let left = KvOptions::keyspace("decr");
        let right = KvOptions::keyspace("incr");
        let key = format!("k{}", n);
        store.set(&key, 10_i64, &left).await.unwrap();
        store.set(&key, 10_i64, &right).await.unwrap();

        let via_decr = store.decr(&key, n, &left).await;
        let via_incr = store.incr(&key, -n, &right).await;
        assert_eq!(via_decr, via_incr, "delta {}", n);
    }
}

#[tokio::test]
async fn test_decr_min_is_rejected() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let err = assert_err!(store.decr("k", i64::MIN, &KvOptions::default()).await);
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn test_incr_overflow_reports_overflow() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let opts = KvOptions::default();
    store.incr("big", i64::MAX, &opts).await.unwrap();

    let err = assert_err!(store.incr("big", 1, &opts).await);
    assert!(err.to_string().contains("overflow"), "{}", err);
    assert_eq!(store.get("big", &opts).await.unwrap(), Some(Bson::Int64(i64::MAX)));
}

#[tokio::test]
async fn test_incr_on_string_fails() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let opts = KvOptions::default();
    store.set("name", "pen", &opts).await.unwrap();
    assert_err!(store.incr("name", 1, &opts).await);
    assert_eq!(store.get("name", &opts).await.unwrap(), Some(Bson::from("pen")));
}

#[tokio::test]
async fn test_keyspace_isolation() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let tenant_a = KvOptions::keyspace("a");
    let tenant_b = KvOptions::keyspace("b");

    store.set("shared", "from-a", &tenant_a).await.unwrap();
    assert_eq!(store.get("shared", &tenant_b).await.unwrap(), None);

    store.del("shared", &tenant_b).await.unwrap();
    assert_eq!(
        store.get("shared", &tenant_a).await.unwrap(),
        Some(Bson::from("from-a"))
    );
}

#[tokio::test]
async fn test_prefix_delete() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let opts = KvOptions::default();
    for key in ["cache:1", "cache:2", "cache:3", "keep"] {
        store.set(key, 1, &opts).await.unwrap();
    }

    let deleted = store.del_all("cache:", &opts).await.unwrap();
    assert_eq!(deleted.count, 3);
    let remaining = store.get_all("", &opts).to_vec().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get_str("key").unwrap(), "keep");
}

//! CRUD engine integration tests
//!
//! Runs the full datastore over the in-memory backend:
//! - insert / point lookup round trips
//! - bulk guards reject before any mutation
//! - scans deliver every document exactly once

mod common;

use bson::{doc, oid::ObjectId, Document};
use tokio_test::{assert_err, assert_ok};

use common::memory_store;
use mongo_datastore::{Count, HandlerRegistry, InsertOutcome, Query, StoreError};

fn id_of(doc: &Document) -> String {
    doc.get_object_id("_id").unwrap().to_hex()
}

// =============================================================================
// Point operations
// =============================================================================

#[tokio::test]
async fn test_insert_returns_document_with_id() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;

    let outcome = assert_ok!(store.insert_one("orders", doc! { "item": "pen" }).await);
    let inserted = outcome.into_document().unwrap();

    assert!(inserted.get_object_id("_id").is_ok());
    assert_eq!(inserted.get_str("item").unwrap(), "pen");
    assert_eq!(inserted.len(), 2);
}

#[tokio::test]
async fn test_get_one_round_trip() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;

    for original in [
        doc! { "item": "pen" },
        doc! { "nested": { "a": [1, 2, 3] }, "flag": true },
        doc! {},
    ] {
        let inserted = store
            .insert_one("things", original.clone())
            .await
            .unwrap()
            .into_document()
            .unwrap();
        let fetched = assert_ok!(store.get_one("things", &id_of(&inserted)).await);

        let mut without_id = fetched.clone();
        without_id.remove("_id");
        assert_eq!(without_id, original);
        assert_eq!(fetched, inserted);
    }
}

#[tokio::test]
async fn test_missing_document_is_not_found() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let err = assert_err!(store.get_one("orders", &ObjectId::new().to_hex()).await);
    assert!(matches!(err, StoreError::NotFound(_)));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_malformed_id_is_validation_error() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let err = assert_err!(store.get_one("orders", "not-an-id").await);
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn test_update_returns_merged_document() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let orders = store.collection("orders");

    let inserted = orders
        .insert_one(doc! { "item": "pen", "qty": 1 })
        .await
        .unwrap()
        .into_document()
        .unwrap();
    let id = id_of(&inserted);

    let merged = assert_ok!(orders.update_one(&id, doc! { "qty": 3 }).await);
    assert_eq!(merged.get_str("item").unwrap(), "pen");
    assert_eq!(merged.get_i32("qty").unwrap(), 3);

    let bumped = assert_ok!(orders.update_one(&id, doc! { "$inc": { "qty": 2 } }).await);
    assert_eq!(bumped.get_i32("qty").unwrap(), 5);

    let replaced = assert_ok!(orders.replace_one(&id, doc! { "item": "ink" }).await);
    assert_eq!(id_of(&replaced), id);
    assert!(replaced.get("qty").is_none());

    assert_eq!(assert_ok!(orders.remove_one(&id).await), id);
    assert_err!(orders.get_one(&id).await);
}

// =============================================================================
// Bulk operations
// =============================================================================

#[tokio::test]
async fn test_bulk_without_filter_has_no_side_effect() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    store
        .insert_one("orders", vec![doc! { "n": 1 }, doc! { "n": 2 }])
        .await
        .unwrap();
    let before = store.find_as_array("orders", Query::all()).await.unwrap();

    let err = assert_err!(store.update_many("orders", doc! { "n": 0 }, None).await);
    assert!(err.is_guard());
    let err = assert_err!(store.remove_many("orders", None).await);
    assert!(err.is_guard());
    let err = assert_err!(store.replace_many("orders", doc! {}, None).await);
    assert!(matches!(err, StoreError::NotSupported(_)));

    let after = store.find_as_array("orders", Query::all()).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_bulk_insert_returns_count() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let outcome = store
        .insert_one("orders", vec![doc! { "n": 1 }, doc! { "n": 2 }, doc! { "n": 3 }])
        .await
        .unwrap();
    assert_eq!(outcome, InsertOutcome::Many(3));
}

#[tokio::test]
async fn test_bulk_with_filter_returns_counts() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    store
        .insert_one(
            "orders",
            vec![
                doc! { "state": "new" },
                doc! { "state": "new" },
                doc! { "state": "done" },
            ],
        )
        .await
        .unwrap();

    let updated = store
        .update_many("orders", doc! { "state": "open" }, Some(doc! { "state": "new" }))
        .await
        .unwrap();
    assert_eq!(updated, Count { count: 2 });

    let removed = store
        .remove_many("orders", Some(doc! { "state": { "$in": ["open", "done"] } }))
        .await
        .unwrap();
    assert_eq!(removed, Count { count: 3 });
}

// =============================================================================
// Scans
// =============================================================================

#[tokio::test]
async fn test_scan_returns_each_document_once() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let docs: Vec<Document> = (0..50).map(|n| doc! { "n": n }).collect();
    store.insert_one("nums", docs).await.unwrap();

    let found = assert_ok!(store.get_many("nums", Query::all()).to_vec().await);
    assert_eq!(found.len(), 50);

    let mut seen: Vec<i32> = found.iter().map(|d| d.get_i32("n").unwrap()).collect();
    seen.sort();
    assert_eq!(seen, (0..50).collect::<Vec<i32>>());
}

#[tokio::test]
async fn test_scan_with_filter() {
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    let docs: Vec<Document> = (0..10).map(|n| doc! { "n": n }).collect();
    store.insert_one("nums", docs).await.unwrap();

    let found = store
        .get_array("nums", Query::filter(doc! { "n": { "$gte": 7 } }))
        .await
        .unwrap();
    assert_eq!(found.len(), 3);
}

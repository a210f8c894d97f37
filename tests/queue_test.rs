//! Queue engine integration tests
//!
//! Tests the tail consumer end to end over the in-memory backend:
//! - dispatch of `{ body: { payload } }` exactly once
//! - missing topics do not block later records
//! - one handler in flight at a time
//! - records are marked processed before dispatch (at-most-once)

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bson::{doc, Bson, Document};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::assert_ok;

use common::{memory_store, WAIT};
use mongo_datastore::{
    Completion, Datastore, HandlerRegistry, QueueHandler, QueueRequest, Session, StoreError,
};

async fn queue_record(store: &Datastore, filter: Document) -> Option<Document> {
    let session: &Session = store.session();
    session.find_one("sysqueue", filter).await.unwrap()
}

/// Handler forwarding each payload to the test and completing immediately
fn forwarding(tx: mpsc::UnboundedSender<Bson>) -> impl QueueHandler {
    move |req: QueueRequest, done: Completion| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(req.body.payload);
            done.end();
            Ok::<(), StoreError>(())
        }
    }
}

// =============================================================================
// Startup
// =============================================================================

#[tokio::test]
async fn test_startup_seeds_processed_sentinel() {
    let (store, memory) = memory_store(HandlerRegistry::new()).await;
    assert!(store.queue().is_running());
    assert!(store.bootstrap_report().is_clean());
    assert!(memory.is_capped("sysqueue"));
    assert_eq!(memory.document_count("sysqueue"), 1);

    let sentinel = queue_record(&store, doc! {}).await.unwrap();
    assert!(sentinel.get_bool("processed").unwrap());
    store.shutdown().await;
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_handler_invoked_once_with_payload() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    store.set_queue("orders", forwarding(tx));

    let id = assert_ok!(store.enqueue("orders", doc! { "item": "pen" }).await);

    let payload = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload, Bson::Document(doc! { "item": "pen" }));

    // No second delivery
    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

    let record = queue_record(&store, doc! { "_id": id }).await.unwrap();
    assert!(record.get_bool("processed").unwrap());
    store.shutdown().await;
}

#[tokio::test]
async fn test_records_delivered_in_order() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let registry = HandlerRegistry::new();
    registry.set("n", forwarding(tx));
    let (store, _) = memory_store(registry).await;

    for n in 0..10 {
        store.enqueue("n", n).await.unwrap();
    }
    let mut seen = Vec::new();
    for _ in 0..10 {
        seen.push(timeout(WAIT, rx.recv()).await.unwrap().unwrap());
    }
    let expected: Vec<Bson> = (0..10).map(Bson::Int32).collect();
    assert_eq!(seen, expected);
    store.shutdown().await;
}

#[tokio::test]
async fn test_missing_topic_does_not_block() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    store.set_queue("known", forwarding(tx));

    let orphan = store.enqueue("unknown", "lost").await.unwrap();
    store.enqueue("known", "seen").await.unwrap();

    let payload = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload, Bson::from("seen"));

    let record = queue_record(&store, doc! { "_id": orphan }).await.unwrap();
    assert!(record.get_bool("processed").unwrap());
    store.shutdown().await;
}

// =============================================================================
// Backpressure
// =============================================================================

#[tokio::test]
async fn test_one_handler_in_flight() {
    let (tx, mut rx) = mpsc::unbounded_channel::<(Bson, Completion)>();
    let (store, _) = memory_store(HandlerRegistry::new()).await;
    store.set_queue("slow", move |req: QueueRequest, done: Completion| {
        let tx = tx.clone();
        async move {
            // Completion travels to the test, which decides when to end it
            let _ = tx.send((req.body.payload, done));
            Ok::<(), StoreError>(())
        }
    });

    store.enqueue("slow", 1).await.unwrap();
    let second = store.enqueue("slow", 2).await.unwrap();

    let (first_payload, first_done) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first_payload, Bson::Int32(1));

    // Second record waits until the first completes
    assert!(timeout(Duration::from_millis(150), rx.recv()).await.is_err());
    let pending = queue_record(&store, doc! { "_id": second }).await.unwrap();
    assert!(!pending.get_bool("processed").unwrap());

    first_done.end();
    let (second_payload, second_done) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(second_payload, Bson::Int32(2));
    second_done.end();
    store.shutdown().await;
}

// =============================================================================
// Handler faults
// =============================================================================

#[tokio::test]
async fn test_failed_handler_is_not_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let registry = HandlerRegistry::new();
    let counter = Arc::clone(&calls);
    registry.set("flaky", move |_: QueueRequest, done: Completion| {
        let counter = Arc::clone(&counter);
        async move {
            let _held = done;
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), StoreError>(StoreError::Database("downstream unavailable".into()))
        }
    });
    registry.set("after", forwarding(tx));
    let (store, _) = memory_store(registry).await;

    let failed = store.enqueue("flaky", "x").await.unwrap();
    store.enqueue("after", "y").await.unwrap();

    // The consumer moved on past the failure
    let payload = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload, Bson::from("y"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let record = queue_record(&store, doc! { "_id": failed }).await.unwrap();
    assert!(record.get_bool("processed").unwrap());
    store.shutdown().await;
}

#[tokio::test]
async fn test_panicking_handler_releases_consumer() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let registry = HandlerRegistry::new();
    registry.set("boom", |_: QueueRequest, _done: Completion| async move {
        if true {
            panic!("handler panicked");
        }
        Ok::<(), StoreError>(())
    });
    registry.set("after", forwarding(tx));
    let (store, _) = memory_store(registry).await;

    store.enqueue("boom", 1).await.unwrap();
    store.enqueue("after", 2).await.unwrap();

    let payload = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload, Bson::Int32(2));
    store.shutdown().await;
}

#[tokio::test]
async fn test_replaced_handler_gets_later_records() {
    let (old_tx, mut old_rx) = mpsc::unbounded_channel();
    let (new_tx, mut new_rx) = mpsc::unbounded_channel();
    let (store, _) = memory_store(HandlerRegistry::new()).await;

    store.set_queue("t", forwarding(old_tx));
    store.set_queue("t", forwarding(new_tx));
    store.enqueue("t", "v").await.unwrap();

    assert_eq!(
        timeout(WAIT, new_rx.recv()).await.unwrap().unwrap(),
        Bson::from("v")
    );
    assert!(old_rx.try_recv().is_err());
    store.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_from_query_dispatches_each_match() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let registry = HandlerRegistry::new();
    registry.set("ship", forwarding(tx));
    let (store, _) = memory_store(registry).await;

    store
        .insert_one(
            "orders",
            vec![doc! { "n": 1, "paid": true }, doc! { "n": 2, "paid": false }],
        )
        .await
        .unwrap();
    let count = store
        .enqueue_from_query("orders", doc! { "paid": true }, "ship")
        .await
        .unwrap();
    assert_eq!(count, 1);

    let payload = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    let Bson::Document(order) = payload else {
        panic!("expected a document payload");
    };
    assert_eq!(order.get_i32("n").unwrap(), 1);
    store.shutdown().await;
}

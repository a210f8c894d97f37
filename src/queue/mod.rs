//! Queue Engine
//!
//! A durable work queue over the bounded log collection. Records go from
//! pending (`processed: false`) to processed exactly once, and the consumer
//! marks a record processed *before* running its handler, so delivery is
//! at-most-once: a handler failure or a crash mid-handling loses that record.
//!
//! ```text
//! enqueue ──insert──▶ [ log: r1 r2 r3 ... ] ◀──tail(processed=false)── consumer
//!                                                                    │
//!                                      mark processed ◀──────────────┤
//!                                      handler(req, completion) ◀────┘
//!                                      completion.end() ──▶ next record
//! ```

mod consumer;
mod handler;

pub use handler::{Completion, HandlerRegistry, QueueBody, QueueHandler, QueueRequest};

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bson::{oid::ObjectId, Bson, Document};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::StoreConfig;
use crate::crud::{CrudEngine, Query};
use crate::db::{QueueRecord, Session};
use crate::stream::StreamEvent;
use crate::types::{Result, StoreError};
use consumer::Consumer;

/// Producer side of the queue plus the single consumer loop
pub struct QueueEngine {
    session: Session,
    registry: HandlerRegistry,
    collection: String,
    retry: Duration,
    started: AtomicBool,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl QueueEngine {
    pub fn new(session: Session, registry: HandlerRegistry, config: &StoreConfig) -> Self {
        Self {
            session,
            registry,
            collection: config.queue_collection.clone(),
            retry: Duration::from_millis(config.tail_retry_ms),
            started: AtomicBool::new(false),
            consumer: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Register (or replace) the handler for `topic`
    pub fn set_queue<H: QueueHandler>(&self, topic: impl Into<String>, handler: H) {
        self.registry.set(topic, handler);
    }

    /// Append a pending record; does not wait for it to be handled
    pub async fn enqueue(&self, topic: &str, payload: impl Into<Bson>) -> Result<ObjectId> {
        let record = QueueRecord::pending(topic, payload.into());
        let id = self
            .session
            .insert_one(&self.collection, bson::to_document(&record)?)
            .await?;
        debug!(topic, id = %id, "enqueue");
        id.as_object_id()
            .ok_or_else(|| StoreError::Database(format!("unexpected queue record id {}", id)))
    }

    /// Enqueue every document matching `filter` in `collection` on `topic`
    ///
    /// Returns the number of records enqueued. A scan failure stops the
    /// operation; records enqueued before it stay in the log.
    pub async fn enqueue_from_query(
        &self,
        collection: &str,
        filter: Document,
        topic: &str,
    ) -> Result<u64> {
        let crud = CrudEngine::new(self.session.clone());
        let mut stream = crud.get_many(collection, Query::filter(filter));
        let mut count = 0;
        while let Some(event) = stream.next_event().await {
            match event {
                StreamEvent::Data(doc) => {
                    self.enqueue(topic, Bson::Document(doc)).await?;
                    count += 1;
                }
                StreamEvent::Error(err) => return Err(err),
                StreamEvent::End => break,
            }
        }
        info!(collection, topic, count, "Enqueued query results");
        Ok(count)
    }

    /// Seed the log and spawn the consumer loop
    ///
    /// Returns false if the consumer was already running.
    pub async fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Queue consumer already running");
            return false;
        }

        if let Err(e) = self.ensure_sentinel().await {
            error!(collection = %self.collection, "Failed to seed queue log: {}", e);
        }

        let consumer = Consumer {
            session: self.session.clone(),
            registry: self.registry.clone(),
            collection: self.collection.clone(),
            retry: self.retry,
        };
        *self.consumer.lock().await = Some(tokio::spawn(consumer.run()));
        true
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Stop the consumer loop
    pub async fn shutdown(&self) {
        if let Some(handle) = self.consumer.lock().await.take() {
            handle.abort();
            info!(collection = %self.collection, "Queue consumer stopped");
        }
        self.started.store(false, Ordering::SeqCst);
    }

    /// Anchor record for the tail cursor of an empty log
    async fn ensure_sentinel(&self) -> Result<()> {
        let existing = self
            .session
            .find_one(&self.collection, Document::new())
            .await?;
        if existing.is_none() {
            self.session
                .insert_one(
                    &self.collection,
                    bson::to_document(&QueueRecord::sentinel())?,
                )
                .await?;
            debug!(collection = %self.collection, "Seeded empty queue log");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryBackend;
    use bson::doc;
    use std::sync::Arc;

    fn engine(memory: &MemoryBackend) -> QueueEngine {
        QueueEngine::new(
            Arc::new(memory.clone()),
            HandlerRegistry::new(),
            &StoreConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_enqueue_writes_pending_record() {
        let memory = MemoryBackend::new();
        let queue = engine(&memory);
        let id = queue.enqueue("orders", doc! { "item": "pen" }).await.unwrap();

        let session: Session = Arc::new(memory.clone());
        let stored = session
            .find_one("sysqueue", doc! { "_id": id })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get_str("topic").unwrap(), "orders");
        assert!(!stored.get_bool("processed").unwrap());
    }

    #[tokio::test]
    async fn test_start_seeds_once() {
        let memory = MemoryBackend::new();
        let queue = engine(&memory);
        assert!(queue.start().await);
        assert!(!queue.start().await);
        assert_eq!(memory.document_count("sysqueue"), 1);
        queue.shutdown().await;
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn test_enqueue_from_query_counts() {
        let memory = MemoryBackend::new();
        let session: Session = Arc::new(memory.clone());
        session
            .insert_many("orders", vec![doc! { "s": "new" }, doc! { "s": "new" }, doc! { "s": "old" }])
            .await
            .unwrap();

        let queue = engine(&memory);
        let count = queue
            .enqueue_from_query("orders", doc! { "s": "new" }, "ship")
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(memory.document_count("sysqueue"), 2);
    }
}

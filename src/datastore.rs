//! Datastore facade
//!
//! The operation surface a host framework calls. Building a `Datastore`
//! bootstraps the system collections and starts the queue consumer.

use std::sync::Arc;

use bson::{oid::ObjectId, Bson, Document};
use tracing::info;

use crate::config::StoreConfig;
use crate::connection::{BootstrapReport, ConnectionManager};
use crate::crud::{CollectionHandle, Count, CrudEngine, InsertInput, InsertOutcome, Query};
use crate::db::{MemoryBackend, Session};
use crate::kv::{KeyValueStore, KvOptions};
use crate::queue::{HandlerRegistry, QueueEngine, QueueHandler};
use crate::stream::DocumentStream;
use crate::types::Result;

pub struct Datastore {
    config: StoreConfig,
    session: Session,
    crud: CrudEngine,
    queue: QueueEngine,
    kv: KeyValueStore,
    bootstrap: BootstrapReport,
}

impl Datastore {
    /// Connect to MongoDB, bootstrap and start the queue consumer
    pub async fn connect(config: StoreConfig, registry: HandlerRegistry) -> Result<Self> {
        let session = ConnectionManager::new(config.clone()).open_session().await?;
        Self::with_session(session, config, registry).await
    }

    /// Build on an existing session
    pub async fn with_session(
        session: Session,
        config: StoreConfig,
        registry: HandlerRegistry,
    ) -> Result<Self> {
        let bootstrap = ConnectionManager::new(config.clone())
            .bootstrap(&session)
            .await;

        let crud = CrudEngine::new(session.clone());
        let queue = QueueEngine::new(session.clone(), registry, &config);
        let kv = KeyValueStore::new(crud.clone(), config.kv_collection.clone());
        queue.start().await;

        info!(backend = session.name(), "Datastore ready");
        Ok(Self {
            config,
            session,
            crud,
            queue,
            kv,
            bootstrap,
        })
    }

    /// In-process datastore with default settings
    pub async fn in_memory(registry: HandlerRegistry) -> Result<Self> {
        let session: Session = Arc::new(MemoryBackend::new());
        Self::with_session(session, StoreConfig::default(), registry).await
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn crud(&self) -> &CrudEngine {
        &self.crud
    }

    pub fn queue(&self) -> &QueueEngine {
        &self.queue
    }

    pub fn kv(&self) -> &KeyValueStore {
        &self.kv
    }

    pub fn bootstrap_report(&self) -> &BootstrapReport {
        &self.bootstrap
    }

    /// Stop the queue consumer
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    pub fn collection(&self, name: impl Into<String>) -> CollectionHandle {
        self.crud.collection(name)
    }

    pub async fn get_one(&self, collection: &str, id: &str) -> Result<Document> {
        self.crud.get_one(collection, id).await
    }

    pub fn get_many(&self, collection: &str, query: Query) -> DocumentStream {
        self.crud.get_many(collection, query)
    }

    pub fn find(&self, collection: &str, query: Query) -> DocumentStream {
        self.crud.find(collection, query)
    }

    pub async fn find_as_array(&self, collection: &str, query: Query) -> Result<Vec<Document>> {
        self.crud.find_as_array(collection, query).await
    }

    pub async fn get_array(&self, collection: &str, query: Query) -> Result<Vec<Document>> {
        self.crud.get_array(collection, query).await
    }

    pub async fn insert_one(
        &self,
        collection: &str,
        input: impl Into<InsertInput>,
    ) -> Result<InsertOutcome> {
        self.crud.insert_one(collection, input).await
    }

    pub async fn update_one(&self, collection: &str, id: &str, patch: Document) -> Result<Document> {
        self.crud.update_one(collection, id, patch).await
    }

    pub async fn replace_one(&self, collection: &str, id: &str, doc: Document) -> Result<Document> {
        self.crud.replace_one(collection, id, doc).await
    }

    pub async fn update_many(
        &self,
        collection: &str,
        patch: Document,
        filter: Option<Document>,
    ) -> Result<Count> {
        self.crud.update_many(collection, patch, filter).await
    }

    pub async fn replace_many(
        &self,
        collection: &str,
        doc: Document,
        filter: Option<Document>,
    ) -> Result<Count> {
        self.crud.replace_many(collection, doc, filter).await
    }

    pub async fn remove_one(&self, collection: &str, id: &str) -> Result<String> {
        self.crud.remove_one(collection, id).await
    }

    pub async fn remove_many(&self, collection: &str, filter: Option<Document>) -> Result<Count> {
        self.crud.remove_many(collection, filter).await
    }

    // ========================================================================
    // Queue
    // ========================================================================

    pub async fn enqueue(&self, topic: &str, payload: impl Into<Bson>) -> Result<ObjectId> {
        self.queue.enqueue(topic, payload).await
    }

    pub async fn enqueue_from_query(
        &self,
        collection: &str,
        filter: Document,
        topic: &str,
    ) -> Result<u64> {
        self.queue.enqueue_from_query(collection, filter, topic).await
    }

    pub fn set_queue<H: QueueHandler>(&self, topic: impl Into<String>, handler: H) {
        self.queue.set_queue(topic, handler);
    }

    // ========================================================================
    // Key-value
    // ========================================================================

    pub async fn set(&self, key: &str, val: impl Into<Bson>, opts: &KvOptions) -> Result<Bson> {
        self.kv.set(key, val, opts).await
    }

    pub async fn get(&self, key: &str, opts: &KvOptions) -> Result<Option<Bson>> {
        self.kv.get(key, opts).await
    }

    pub async fn del(&self, key: &str, opts: &KvOptions) -> Result<Count> {
        self.kv.del(key, opts).await
    }

    pub fn get_all(&self, prefix: &str, opts: &KvOptions) -> DocumentStream {
        self.kv.get_all(prefix, opts)
    }

    pub async fn del_all(&self, prefix: &str, opts: &KvOptions) -> Result<Count> {
        self.kv.del_all(prefix, opts).await
    }

    pub async fn incr(&self, key: &str, num: i64, opts: &KvOptions) -> Result<Bson> {
        self.kv.incr(key, num, opts).await
    }

    pub async fn decr(&self, key: &str, num: i64, opts: &KvOptions) -> Result<Bson> {
        self.kv.decr(key, num, opts).await
    }
}

//! MongoDB session backend
//!
//! Wraps one `mongodb::Client` bound to a database. Every collection handle is
//! derived from it on demand; collections are created implicitly by the
//! server on first write.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::StreamExt;
use mongodb::{
    error::ErrorKind,
    options::{CursorType, FindOptions, IndexOptions},
    Client, Collection, Database, IndexModel,
};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::db::backend::{
    CollectionSpec, CreateOutcome, DocumentCursor, FindHints, IndexSpec, StoreBackend,
    UpdateOutcome,
};
use crate::types::{Result, StoreError};

/// Server error code for "collection already exists"
const NAMESPACE_EXISTS: i32 = 48;

/// MongoDB session
#[derive(Clone)]
pub struct MongoBackend {
    db: Database,
    db_name: String,
}

impl MongoBackend {
    /// Establish the session and verify it with a ping
    ///
    /// Failure here is fatal for the caller: nothing else can work without a
    /// session.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!("Connecting to MongoDB at {}", config.mongodb_uri);

        let client = Client::with_uri_str(&config.timeout_uri())
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to MongoDB: {}", e)))?;

        let db = client.database(&config.mongodb_db);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Connection(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", config.mongodb_db);

        Ok(Self {
            db,
            db_name: config.mongodb_db.clone(),
        })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

fn is_namespace_exists(err: &mongodb::error::Error) -> bool {
    matches!(*err.kind, ErrorKind::Command(ref cmd) if cmd.code == NAMESPACE_EXISTS)
}

#[async_trait]
impl StoreBackend for MongoBackend {
    fn name(&self) -> &str {
        "mongodb"
    }

    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>> {
        Ok(self.collection(collection).find_one(filter).await?)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        hints: FindHints,
    ) -> Result<DocumentCursor> {
        let options = FindOptions::builder()
            .sort(hints.sort)
            .skip(hints.skip)
            .limit(hints.limit)
            .projection(hints.projection)
            .build();

        let cursor = self
            .collection(collection)
            .find(filter)
            .with_options(options)
            .await?;

        Ok(cursor.map(|item| item.map_err(StoreError::from)).boxed())
    }

    async fn tail(&self, collection: &str, filter: Document) -> Result<DocumentCursor> {
        let options = FindOptions::builder()
            .cursor_type(CursorType::TailableAwait)
            .build();

        let cursor = self
            .collection(collection)
            .find(filter)
            .with_options(options)
            .await?;

        debug!(collection, "Tail cursor opened");
        Ok(cursor.map(|item| item.map_err(StoreError::from)).boxed())
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<Bson> {
        let result = self.collection(collection).insert_one(doc).await?;
        Ok(result.inserted_id)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<u64> {
        if docs.is_empty() {
            return Ok(0);
        }
        let result = self.collection(collection).insert_many(docs).await?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let result = self
            .collection(collection)
            .update_one(filter, update)
            .upsert(upsert)
            .await?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<u64> {
        let result = self
            .collection(collection)
            .update_many(filter, update)
            .await?;
        Ok(result.modified_count)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> Result<UpdateOutcome> {
        let result = self
            .collection(collection)
            .replace_one(filter, replacement)
            .await?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64> {
        let result = self.collection(collection).delete_one(filter).await?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
        let result = self.collection(collection).delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    async fn create_collection(&self, name: &str, spec: CollectionSpec) -> Result<CreateOutcome> {
        let action = self.db.create_collection(name);
        let result = match spec.capped_bytes {
            Some(bytes) => action.capped(true).size(bytes).await,
            None => action.await,
        };

        match result {
            Ok(()) => Ok(CreateOutcome::Created),
            Err(e) if is_namespace_exists(&e) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<CreateOutcome> {
        let coll = self.collection(collection);

        // createIndexes succeeds silently for an identical index, so check first
        // to report the outcome accurately.
        if let Ok(names) = coll.list_index_names().await {
            if names.iter().any(|n| n == &index.name) {
                return Ok(CreateOutcome::AlreadyExists);
            }
        }

        let model = IndexModel::builder()
            .keys(index.keys)
            .options(IndexOptions::builder().name(index.name).build())
            .build();

        coll.create_index(model).await?;
        Ok(CreateOutcome::Created)
    }
}

//! Session abstraction shared by every component
//!
//! `StoreBackend` is the explicit session handle: the Connection Manager
//! creates one and the CRUD engine, queue engine and key-value store each
//! receive it at construction. `MongoBackend` talks to a real server,
//! `MemoryBackend` keeps everything in process.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;

use crate::types::Result;

/// Forward-only cursor over documents produced by a backend
pub type DocumentCursor = BoxStream<'static, Result<Document>>;

/// Shared session handle
pub type Session = Arc<dyn StoreBackend>;

/// Engine-specific scan hints for `find`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindHints {
    /// Sort specification, e.g. `{ "created": -1 }`
    pub sort: Option<Document>,
    /// Number of matching documents to skip
    pub skip: Option<u64>,
    /// Maximum number of documents to return
    pub limit: Option<i64>,
    /// Field projection, e.g. `{ "name": 1 }`
    pub projection: Option<Document>,
}

impl FindHints {
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// How a collection should be created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionSpec {
    /// Byte cap for a bounded (capped) collection; `None` for unbounded
    pub capped_bytes: Option<u64>,
}

impl CollectionSpec {
    pub fn unbounded() -> Self {
        Self { capped_bytes: None }
    }

    pub fn capped(bytes: u64) -> Self {
        Self {
            capped_bytes: Some(bytes),
        }
    }
}

/// Index definition
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Document,
}

/// Outcome of an idempotent create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Outcome of a single-document update or replace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
}

/// Primitive document operations the adapter is built on
///
/// All mutation atomicity comes from the store itself; implementations must
/// apply each single-document write atomically and perform upserts as one
/// operation.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Backend identifier used in logs
    fn name(&self) -> &str;

    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>>;

    /// Open a finite scan over matching documents
    async fn find(&self, collection: &str, filter: Document, hints: FindHints)
        -> Result<DocumentCursor>;

    /// Open a blocking cursor that yields matching documents in insertion
    /// order and then waits for new ones
    async fn tail(&self, collection: &str, filter: Document) -> Result<DocumentCursor>;

    /// Insert one document, returning its identifier
    async fn insert_one(&self, collection: &str, doc: Document) -> Result<Bson>;

    /// Insert many documents, returning how many were inserted
    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<u64>;

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome>;

    /// Apply an update to every match, returning the modified count
    async fn update_many(&self, collection: &str, filter: Document, update: Document)
        -> Result<u64>;

    async fn replace_one(&self, collection: &str, filter: Document, replacement: Document)
        -> Result<UpdateOutcome>;

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64>;

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64>;

    async fn create_collection(&self, name: &str, spec: CollectionSpec) -> Result<CreateOutcome>;

    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<CreateOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_hints_builder() {
        let hints = FindHints::default()
            .sort(doc! { "n": 1 })
            .skip(2)
            .limit(10);
        assert_eq!(hints.sort, Some(doc! { "n": 1 }));
        assert_eq!(hints.skip, Some(2));
        assert_eq!(hints.limit, Some(10));
        assert!(hints.projection.is_none());
    }

    #[test]
    fn test_collection_spec() {
        assert_eq!(CollectionSpec::unbounded().capped_bytes, None);
        assert_eq!(CollectionSpec::capped(1024).capped_bytes, Some(1024));
    }
}

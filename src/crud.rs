//! CRUD Engine
//!
//! Generic document operations over any collection of the session. Point
//! operations address documents by their hex `ObjectId`; scans return a
//! [`DocumentStream`] immediately and traverse on a background task.

use bson::{doc, oid::ObjectId, Bson, Document};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::query::is_update_document;
use crate::db::{FindHints, Session};
use crate::stream::DocumentStream;
use crate::types::{Result, StoreError};

/// Filter plus scan hints for a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Match-all when `None`
    pub filter: Option<Document>,
    pub hints: FindHints,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(filter: Document) -> Self {
        Self {
            filter: Some(filter),
            hints: FindHints::default(),
        }
    }

    pub fn with_hints(mut self, hints: FindHints) -> Self {
        self.hints = hints;
        self
    }
}

impl From<Document> for Query {
    fn from(filter: Document) -> Self {
        Self::filter(filter)
    }
}

/// Argument of `insert_one`: one document or a batch
#[derive(Debug, Clone, PartialEq)]
pub enum InsertInput {
    One(Document),
    Many(Vec<Document>),
}

impl From<Document> for InsertInput {
    fn from(doc: Document) -> Self {
        Self::One(doc)
    }
}

impl From<Vec<Document>> for InsertInput {
    fn from(docs: Vec<Document>) -> Self {
        Self::Many(docs)
    }
}

/// Result of `insert_one`
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The input document with `_id` populated
    One(Document),
    /// Number of documents inserted by a batch
    Many(u64),
}

impl InsertOutcome {
    pub fn document(&self) -> Option<&Document> {
        match self {
            Self::One(doc) => Some(doc),
            Self::Many(_) => None,
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            Self::One(doc) => Some(doc),
            Self::Many(_) => None,
        }
    }
}

/// Count wrapper returned by bulk mutations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Count {
    pub count: u64,
}

/// Parse a hex identifier string
pub fn parse_id(id: &str) -> Result<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| StoreError::Validation(format!("invalid id: {}", id)))
}

fn id_filter(id: ObjectId) -> Document {
    doc! { "_id": id }
}

/// Wrap a plain patch as a field set
fn as_update(patch: Document) -> Result<Document> {
    if patch.is_empty() {
        return Err(StoreError::Validation("update patch is empty".into()));
    }
    if is_update_document(&patch) {
        Ok(patch)
    } else {
        Ok(doc! { "$set": patch })
    }
}

/// Generic document operations bound to a session
#[derive(Clone)]
pub struct CrudEngine {
    session: Session,
}

impl CrudEngine {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Per-collection view of this engine
    pub fn collection(&self, name: impl Into<String>) -> CollectionHandle {
        CollectionHandle {
            engine: self.clone(),
            name: name.into(),
        }
    }

    /// Point lookup by identifier
    pub async fn get_one(&self, collection: &str, id: &str) -> Result<Document> {
        let oid = parse_id(id)?;
        debug!(collection, id, "getOne");
        self.session
            .find_one(collection, id_filter(oid))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{} in {}", id, collection)))
    }

    /// Stream every document matching the query
    pub fn get_many(&self, collection: &str, query: Query) -> DocumentStream {
        debug!(collection, filter = ?query.filter, "getMany");
        let session = self.session.clone();
        let collection = collection.to_string();
        let Query { filter, hints } = query;
        DocumentStream::spawn(async move {
            session
                .find(&collection, filter.unwrap_or_default(), hints)
                .await
        })
    }

    /// Alias of [`CrudEngine::get_many`]
    pub fn find(&self, collection: &str, query: Query) -> DocumentStream {
        self.get_many(collection, query)
    }

    /// Collect every document matching the query
    pub async fn find_as_array(&self, collection: &str, query: Query) -> Result<Vec<Document>> {
        self.get_many(collection, query).to_vec().await
    }

    /// Alias of [`CrudEngine::find_as_array`]
    pub async fn get_array(&self, collection: &str, query: Query) -> Result<Vec<Document>> {
        self.find_as_array(collection, query).await
    }

    /// Insert a document, or a batch of documents
    pub async fn insert_one(
        &self,
        collection: &str,
        input: impl Into<InsertInput>,
    ) -> Result<InsertOutcome> {
        match input.into() {
            InsertInput::One(doc) => {
                let id = self.session.insert_one(collection, doc.clone()).await?;
                debug!(collection, id = %id, "insertOne");
                Ok(InsertOutcome::One(with_id(id, doc)))
            }
            InsertInput::Many(docs) => {
                if docs.is_empty() {
                    return Ok(InsertOutcome::Many(0));
                }
                let count = self.session.insert_many(collection, docs).await?;
                debug!(collection, count, "insertMany");
                Ok(InsertOutcome::Many(count))
            }
        }
    }

    /// Merge `patch` into a document and return the result
    pub async fn update_one(&self, collection: &str, id: &str, patch: Document) -> Result<Document> {
        let oid = parse_id(id)?;
        let update = as_update(patch)?;
        let outcome = self
            .session
            .update_one(collection, id_filter(oid), update, false)
            .await?;
        debug!(collection, id, modified = outcome.modified, "updateOne");
        if outcome.matched == 0 {
            return Err(StoreError::NotFound(format!("{} in {}", id, collection)));
        }
        self.get_one(collection, id).await
    }

    /// Substitute a document body, keeping its identifier
    pub async fn replace_one(
        &self,
        collection: &str,
        id: &str,
        mut replacement: Document,
    ) -> Result<Document> {
        let oid = parse_id(id)?;
        replacement.remove("_id");
        let outcome = self
            .session
            .replace_one(collection, id_filter(oid), replacement)
            .await?;
        debug!(collection, id, modified = outcome.modified, "replaceOne");
        if outcome.matched == 0 {
            return Err(StoreError::NotFound(format!("{} in {}", id, collection)));
        }
        self.get_one(collection, id).await
    }

    /// Apply `patch` to every match of a required filter
    pub async fn update_many(
        &self,
        collection: &str,
        patch: Document,
        filter: Option<Document>,
    ) -> Result<Count> {
        let filter = filter.ok_or_else(|| {
            StoreError::Validation("updateMany requires a filter".into())
        })?;
        let update = as_update(patch)?;
        let count = self.session.update_many(collection, filter, update).await?;
        debug!(collection, count, "updateMany");
        Ok(Count { count })
    }

    /// Bulk replace is not offered
    pub async fn replace_many(
        &self,
        collection: &str,
        _replacement: Document,
        _filter: Option<Document>,
    ) -> Result<Count> {
        Err(StoreError::NotSupported(format!(
            "replaceMany on {}",
            collection
        )))
    }

    /// Delete by identifier, returning the identifier
    pub async fn remove_one(&self, collection: &str, id: &str) -> Result<String> {
        let oid = parse_id(id)?;
        let deleted = self.session.delete_one(collection, id_filter(oid)).await?;
        debug!(collection, id, deleted, "removeOne");
        Ok(id.to_string())
    }

    /// Delete every match of a required filter
    pub async fn remove_many(&self, collection: &str, filter: Option<Document>) -> Result<Count> {
        let filter = filter.ok_or_else(|| {
            StoreError::Validation("removeMany requires a filter".into())
        })?;
        let count = self.session.delete_many(collection, filter).await?;
        debug!(collection, count, "removeMany");
        Ok(Count { count })
    }
}

/// `doc` with `_id` set to `id`, placed first
fn with_id(id: Bson, doc: Document) -> Document {
    let mut out = Document::new();
    out.insert("_id", id);
    for (key, value) in doc {
        if key != "_id" {
            out.insert(key, value);
        }
    }
    out
}

/// CRUD operations scoped to one collection
#[derive(Clone)]
pub struct CollectionHandle {
    engine: CrudEngine,
    name: String,
}

impl CollectionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get_one(&self, id: &str) -> Result<Document> {
        self.engine.get_one(&self.name, id).await
    }

    pub fn get_many(&self, query: Query) -> DocumentStream {
        self.engine.get_many(&self.name, query)
    }

    pub fn find(&self, query: Query) -> DocumentStream {
        self.engine.find(&self.name, query)
    }

    pub async fn find_as_array(&self, query: Query) -> Result<Vec<Document>> {
        self.engine.find_as_array(&self.name, query).await
    }

    pub async fn get_array(&self, query: Query) -> Result<Vec<Document>> {
        self.engine.get_array(&self.name, query).await
    }

    pub async fn insert_one(&self, input: impl Into<InsertInput>) -> Result<InsertOutcome> {
        self.engine.insert_one(&self.name, input).await
    }

    pub async fn update_one(&self, id: &str, patch: Document) -> Result<Document> {
        self.engine.update_one(&self.name, id, patch).await
    }

    pub async fn replace_one(&self, id: &str, replacement: Document) -> Result<Document> {
        self.engine.replace_one(&self.name, id, replacement).await
    }

    pub async fn update_many(&self, patch: Document, filter: Option<Document>) -> Result<Count> {
        self.engine.update_many(&self.name, patch, filter).await
    }

    pub async fn replace_many(
        &self,
        replacement: Document,
        filter: Option<Document>,
    ) -> Result<Count> {
        self.engine.replace_many(&self.name, replacement, filter).await
    }

    pub async fn remove_one(&self, id: &str) -> Result<String> {
        self.engine.remove_one(&self.name, id).await
    }

    pub async fn remove_many(&self, filter: Option<Document>) -> Result<Count> {
        self.engine.remove_many(&self.name, filter).await
    }
}

//! In-process backend
//!
//! Keeps every collection in memory with the same observable contract as the
//! MongoDB backend: generated `ObjectId`s, implicit collection creation,
//! capped collections evicting their oldest documents, and blocking tail
//! cursors. Used by the test suite and for running without a server.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use dashmap::{mapref::one::RefMut, DashMap};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::db::backend::{
    CollectionSpec, CreateOutcome, DocumentCursor, FindHints, IndexSpec, StoreBackend,
    UpdateOutcome,
};
use crate::db::query::{apply_update, matches, project, sort_documents, upsert_seed};
use crate::types::{Result, StoreError};

fn doc_size(doc: &Document) -> u64 {
    bson::to_vec(doc).map(|bytes| bytes.len() as u64).unwrap_or(0)
}

struct MemCollection {
    /// Documents keyed by insertion sequence
    docs: BTreeMap<u64, Document>,
    capped_bytes: Option<u64>,
    size_bytes: u64,
    indexes: HashSet<String>,
    /// Highest sequence inserted, watched by tail cursors
    changes: watch::Sender<u64>,
}

impl MemCollection {
    fn new(spec: CollectionSpec) -> Self {
        let (changes, _) = watch::channel(0);
        let mut indexes = HashSet::new();
        indexes.insert("_id_".to_string());
        Self {
            docs: BTreeMap::new(),
            capped_bytes: spec.capped_bytes,
            size_bytes: 0,
            indexes,
            changes,
        }
    }

    fn find_first(&self, filter: &Document) -> Result<Option<u64>> {
        for (seq, doc) in &self.docs {
            if matches(doc, filter)? {
                return Ok(Some(*seq));
            }
        }
        Ok(None)
    }

    fn find_all(&self, filter: &Document) -> Result<Vec<u64>> {
        let mut seqs = Vec::new();
        for (seq, doc) in &self.docs {
            if matches(doc, filter)? {
                seqs.push(*seq);
            }
        }
        Ok(seqs)
    }

    /// Replace the document at `seq`, keeping the size accounting right
    fn store(&mut self, seq: u64, doc: Document) {
        let size = doc_size(&doc);
        if let Some(old) = self.docs.insert(seq, doc) {
            self.size_bytes = self.size_bytes.saturating_sub(doc_size(&old));
        }
        self.size_bytes += size;
    }

    fn remove(&mut self, seq: u64) -> bool {
        match self.docs.remove(&seq) {
            Some(old) => {
                self.size_bytes = self.size_bytes.saturating_sub(doc_size(&old));
                true
            }
            None => false,
        }
    }

    /// Drop oldest documents until the collection fits its cap
    fn evict(&mut self) {
        let Some(cap) = self.capped_bytes else {
            return;
        };
        while self.size_bytes > cap && self.docs.len() > 1 {
            if let Some((_, old)) = self.docs.pop_first() {
                self.size_bytes = self.size_bytes.saturating_sub(doc_size(&old));
            }
        }
    }
}

struct MemoryInner {
    collections: DashMap<String, MemCollection>,
    next_seq: AtomicU64,
}

/// In-memory session
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                collections: DashMap::new(),
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    fn entry(&self, name: &str) -> RefMut<'_, String, MemCollection> {
        self.inner
            .collections
            .entry(name.to_string())
            .or_insert_with(|| MemCollection::new(CollectionSpec::unbounded()))
    }

    /// Number of documents currently held by a collection
    pub fn document_count(&self, collection: &str) -> usize {
        self.inner
            .collections
            .get(collection)
            .map(|c| c.docs.len())
            .unwrap_or(0)
    }

    /// Encoded size of a collection's contents
    pub fn size_bytes(&self, collection: &str) -> u64 {
        self.inner
            .collections
            .get(collection)
            .map(|c| c.size_bytes)
            .unwrap_or(0)
    }

    /// Whether a collection was created with a byte cap
    pub fn is_capped(&self, collection: &str) -> bool {
        self.inner
            .collections
            .get(collection)
            .map(|c| c.capped_bytes.is_some())
            .unwrap_or(false)
    }

    fn insert_into(&self, name: &str, coll: &mut MemCollection, doc: Document) -> Result<Bson> {
        let (id, doc) = match doc.get("_id") {
            Some(id) => (id.clone(), doc),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = doc! { "_id": id.clone() };
                for (k, v) in doc {
                    with_id.insert(k, v);
                }
                (id, with_id)
            }
        };

        if coll.docs.values().any(|d| d.get("_id") == Some(&id)) {
            return Err(StoreError::Database(format!(
                "E11000 duplicate key error collection: {} index: _id_ dup key: {{ _id: {} }}",
                name, id
            )));
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        coll.store(seq, doc);
        coll.evict();
        coll.changes.send_replace(seq);
        Ok(id)
    }
}

/// Apply an update to the document at `seq`
fn update_at(coll: &mut MemCollection, seq: u64, update: &Document) -> Result<bool> {
    let Some(before) = coll.docs.get(&seq) else {
        return Ok(false);
    };
    let mut after = before.clone();
    apply_update(&mut after, update, false)?;

    if after.get("_id") != before.get("_id") {
        return Err(StoreError::Database(
            "Performing an update on the path '_id' would modify the immutable field '_id'".into(),
        ));
    }

    let modified = &after != before;
    if modified {
        coll.store(seq, after);
        coll.evict();
    }
    Ok(modified)
}

struct TailState {
    inner: Arc<MemoryInner>,
    collection: String,
    filter: Document,
    /// Highest sequence already examined
    position: u64,
    rx: watch::Receiver<u64>,
    failed: bool,
}

impl TailState {
    /// Next matching document past the cursor position
    ///
    /// Documents examined and rejected are passed over for good, as a
    /// tailable cursor does.
    fn advance(&mut self) -> Result<Option<Document>> {
        let Some(coll) = self.inner.collections.get(&self.collection) else {
            return Ok(None);
        };
        for (seq, doc) in coll.docs.range(self.position + 1..) {
            self.position = *seq;
            if matches(doc, &self.filter)? {
                return Ok(Some(doc.clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>> {
        let Some(coll) = self.inner.collections.get(collection) else {
            return Ok(None);
        };
        Ok(coll
            .find_first(&filter)?
            .and_then(|seq| coll.docs.get(&seq).cloned()))
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        hints: FindHints,
    ) -> Result<DocumentCursor> {
        let mut docs: Vec<Document> = match self.inner.collections.get(collection) {
            Some(coll) => {
                let mut out = Vec::new();
                for doc in coll.docs.values() {
                    if matches(doc, &filter)? {
                        out.push(doc.clone());
                    }
                }
                out
            }
            None => Vec::new(),
        };

        if let Some(sort) = &hints.sort {
            sort_documents(&mut docs, sort);
        }

        let skip = hints.skip.unwrap_or(0) as usize;
        let limit = match hints.limit {
            Some(n) if n != 0 => n.unsigned_abs() as usize,
            _ => usize::MAX,
        };

        let projection = hints.projection.unwrap_or_default();
        let docs: Vec<Result<Document>> = docs
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| Ok(project(doc, &projection)))
            .collect();

        Ok(futures::stream::iter(docs).boxed())
    }

    async fn tail(&self, collection: &str, filter: Document) -> Result<DocumentCursor> {
        let rx = self.entry(collection).changes.subscribe();
        let state = TailState {
            inner: Arc::clone(&self.inner),
            collection: collection.to_string(),
            filter,
            position: 0,
            rx,
            failed: false,
        };

        debug!(collection, "Memory tail cursor opened");

        let cursor = futures::stream::unfold(state, |mut state| async move {
            if state.failed {
                return None;
            }
            loop {
                // Mark the current version seen before scanning so an insert
                // racing the scan still wakes the wait below.
                let _ = state.rx.borrow_and_update();
                match state.advance() {
                    Ok(Some(doc)) => return Some((Ok(doc), state)),
                    Ok(None) => {}
                    Err(e) => {
                        state.failed = true;
                        return Some((Err(e), state));
                    }
                }
                if state.rx.changed().await.is_err() {
                    warn!(collection = %state.collection, "Tail source dropped");
                    return None;
                }
            }
        });

        Ok(cursor.boxed())
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<Bson> {
        let mut coll = self.entry(collection);
        self.insert_into(collection, &mut coll, doc)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<u64> {
        let mut coll = self.entry(collection);
        let mut inserted = 0;
        for doc in docs {
            self.insert_into(collection, &mut coll, doc)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let mut coll = self.entry(collection);

        match coll.find_first(&filter)? {
            Some(seq) => {
                let modified = update_at(&mut coll, seq, &update)?;
                Ok(UpdateOutcome {
                    matched: 1,
                    modified: u64::from(modified),
                    upserted_id: None,
                })
            }
            None if upsert => {
                let mut doc = upsert_seed(&filter);
                apply_update(&mut doc, &update, true)?;
                let id = self.insert_into(collection, &mut coll, doc)?;
                Ok(UpdateOutcome {
                    matched: 0,
                    modified: 0,
                    upserted_id: Some(id),
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<u64> {
        let Some(mut coll) = self.inner.collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut modified = 0;
        for seq in coll.find_all(&filter)? {
            if update_at(&mut coll, seq, &update)? {
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> Result<UpdateOutcome> {
        let Some(mut coll) = self.inner.collections.get_mut(collection) else {
            return Ok(UpdateOutcome::default());
        };
        let Some(seq) = coll.find_first(&filter)? else {
            return Ok(UpdateOutcome::default());
        };
        let Some(before) = coll.docs.get(&seq).cloned() else {
            return Ok(UpdateOutcome::default());
        };

        let id = before.get("_id").cloned().unwrap_or(Bson::Null);
        if let Some(new_id) = replacement.get("_id") {
            if new_id != &id {
                return Err(StoreError::Database(
                    "The _id field cannot be changed by a replacement".into(),
                ));
            }
        }

        let mut after = doc! { "_id": id };
        for (k, v) in replacement {
            if k != "_id" {
                after.insert(k, v);
            }
        }

        let modified = after != before;
        if modified {
            coll.store(seq, after);
            coll.evict();
        }
        Ok(UpdateOutcome {
            matched: 1,
            modified: u64::from(modified),
            upserted_id: None,
        })
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64> {
        let Some(mut coll) = self.inner.collections.get_mut(collection) else {
            return Ok(0);
        };
        match coll.find_first(&filter)? {
            Some(seq) => Ok(u64::from(coll.remove(seq))),
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
        let Some(mut coll) = self.inner.collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut deleted = 0;
        for seq in coll.find_all(&filter)? {
            if coll.remove(seq) {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn create_collection(&self, name: &str, spec: CollectionSpec) -> Result<CreateOutcome> {
        if self.inner.collections.contains_key(name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        self.inner
            .collections
            .insert(name.to_string(), MemCollection::new(spec));
        Ok(CreateOutcome::Created)
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<CreateOutcome> {
        let mut coll = self.entry(collection);
        if coll.indexes.insert(index.name) {
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }
}

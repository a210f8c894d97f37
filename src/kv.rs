//! Key-Value Store
//!
//! Layered on the CRUD engine against one collection, partitioned by
//! keyspace. Writes are single-document upserts on `(key, keyspace)`, so
//! there is at most one record per pair without a unique index.

use bson::{doc, Bson};
use tracing::debug;

use crate::crud::{Count, CrudEngine, Query};
use crate::db::{KeyValueRecord, DEFAULT_KEYSPACE};
use crate::stream::DocumentStream;
use crate::types::{Result, StoreError};

/// Per-call options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvOptions {
    /// Falls back to `default_keyspace`
    pub keyspace: Option<String>,
}

impl KvOptions {
    pub fn keyspace(keyspace: impl Into<String>) -> Self {
        Self {
            keyspace: Some(keyspace.into()),
        }
    }

    fn resolved(&self) -> &str {
        self.keyspace.as_deref().unwrap_or(DEFAULT_KEYSPACE)
    }
}

#[derive(Clone)]
pub struct KeyValueStore {
    crud: CrudEngine,
    collection: String,
}

impl KeyValueStore {
    pub fn new(crud: CrudEngine, collection: impl Into<String>) -> Self {
        Self {
            crud,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Upsert `val` under `key`, returning the value written
    pub async fn set(&self, key: &str, val: impl Into<Bson>, opts: &KvOptions) -> Result<Bson> {
        let val = val.into();
        let keyspace = opts.resolved();
        self.crud
            .session()
            .update_one(
                &self.collection,
                KeyValueRecord::key_filter(key, keyspace),
                doc! { "$set": { "key": key, "val": val.clone() } },
                true,
            )
            .await?;
        debug!(key, keyspace, "kv set");
        Ok(val)
    }

    /// Value under `key`, or `None` if there is no record
    pub async fn get(&self, key: &str, opts: &KvOptions) -> Result<Option<Bson>> {
        let keyspace = opts.resolved();
        let docs = self
            .crud
            .find_as_array(
                &self.collection,
                Query::filter(KeyValueRecord::key_filter(key, keyspace)),
            )
            .await?;
        debug!(key, keyspace, found = !docs.is_empty(), "kv get");
        Ok(docs.into_iter().next().map(|d| d.get("val").cloned().unwrap_or(Bson::Null)))
    }

    /// Delete the record under `key`; deleting a missing key is a no-op
    pub async fn del(&self, key: &str, opts: &KvOptions) -> Result<Count> {
        let keyspace = opts.resolved();
        let count = self
            .crud
            .remove_many(
                &self.collection,
                Some(KeyValueRecord::key_filter(key, keyspace)),
            )
            .await?;
        debug!(key, keyspace, deleted = count.count, "kv del");
        Ok(count)
    }

    /// Atomically add `num` to the value under `key`, creating it at `num`
    ///
    /// Returns the value read back after the write.
    pub async fn incr(&self, key: &str, num: i64, opts: &KvOptions) -> Result<Bson> {
        let keyspace = opts.resolved();
        self.crud
            .session()
            .update_one(
                &self.collection,
                KeyValueRecord::key_filter(key, keyspace),
                doc! { "$inc": { "val": num } },
                true,
            )
            .await?;
        debug!(key, keyspace, num, "kv incr");
        Ok(self.get(key, opts).await?.unwrap_or(Bson::Null))
    }

    /// `incr` with the sign of `num` inverted
    pub async fn decr(&self, key: &str, num: i64, opts: &KvOptions) -> Result<Bson> {
        let negated = num
            .checked_neg()
            .ok_or_else(|| StoreError::Validation(format!("cannot negate delta {}", num)))?;
        self.incr(key, negated, opts).await
    }

    /// Stream every record whose key starts with `prefix`
    pub fn get_all(&self, prefix: &str, opts: &KvOptions) -> DocumentStream {
        self.crud.get_many(
            &self.collection,
            Query::filter(KeyValueRecord::prefix_filter(prefix, opts.resolved())),
        )
    }

    /// Delete every record whose key starts with `prefix`
    pub async fn del_all(&self, prefix: &str, opts: &KvOptions) -> Result<Count> {
        self.crud
            .remove_many(
                &self.collection,
                Some(KeyValueRecord::prefix_filter(prefix, opts.resolved())),
            )
            .await
    }
}

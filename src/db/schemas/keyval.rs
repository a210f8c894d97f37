//! Key-value record schema
//!
//! At most one record per `(key, keyspace)`; writers upsert on that pair
//! instead of relying on a unique constraint.

use bson::{doc, oid::ObjectId, Bson, Document};
use serde::{Deserialize, Serialize};

use crate::db::backend::IndexSpec;
use crate::db::schemas::IntoIndexes;

/// Keyspace used when a caller does not name one
pub const DEFAULT_KEYSPACE: &str = "default_keyspace";

/// Key-value record stored in the KV collection
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KeyValueRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub key: String,

    pub keyspace: String,

    #[serde(default)]
    pub val: Bson,
}

impl KeyValueRecord {
    /// Filter selecting exactly the record for `(key, keyspace)`
    pub fn key_filter(key: &str, keyspace: &str) -> Document {
        doc! { "key": key, "keyspace": keyspace }
    }

    /// Filter selecting every key starting with `prefix` in `keyspace`
    ///
    /// The prefix is matched literally; regex metacharacters are escaped.
    pub fn prefix_filter(prefix: &str, keyspace: &str) -> Document {
        let pattern = format!("^{}", regex::escape(prefix));
        doc! { "key": { "$regex": pattern }, "keyspace": keyspace }
    }
}

impl IntoIndexes for KeyValueRecord {
    fn into_indices() -> Vec<IndexSpec> {
        vec![IndexSpec {
            name: "key_1_keyspace_1".to_string(),
            keys: doc! { "key": 1, "keyspace": 1 },
        }]
    }
}

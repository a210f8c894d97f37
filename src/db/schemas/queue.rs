//! Queue record schema
//!
//! One record per enqueued message in the bounded log. `processed` flips from
//! `false` to `true` exactly once, done by the consumer; records are never
//! deleted, only evicted by the log's size cap.

use bson::{doc, oid::ObjectId, Bson, Document};
use serde::{Deserialize, Serialize};


/// Topic of the anchor record written into an empty log
pub const SENTINEL_TOPIC: &str = "__seed__";

/// Queue record stored in the log collection
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QueueRecord {
    /// Store-generated identifier
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Routing label
    #[serde(default)]
    pub topic: String,

    /// Arbitrary message body
    #[serde(default)]
    pub payload: Bson,

    /// Whether the consumer has taken this record
    #[serde(default)]
    pub processed: bool,
}

impl QueueRecord {
    /// New pending record
    pub fn pending(topic: impl Into<String>, payload: Bson) -> Self {
        Self {
            id: None,
            topic: topic.into(),
            payload,
            processed: false,
        }
    }

    /// Already-processed record anchoring the tail cursor of an empty log
    pub fn sentinel() -> Self {
        Self {
            id: None,
            topic: SENTINEL_TOPIC.to_string(),
            payload: Bson::Null,
            processed: true,
        }
    }

    /// Filter the consumer tails on
    pub fn pending_filter() -> Document {
        doc! { "processed": false }
    }

    /// Update marking a record taken
    pub fn mark_processed() -> Document {
        doc! { "$set": { "processed": true } }
    }
}

//! BSON to JSON conversion for output written to hosts
//!
//! Identifiers are rendered as their hex string and dates as RFC 3339, which
//! is how HTTP clients of the adapter expect to see them. Everything else uses
//! relaxed extended JSON.

use bson::{Bson, Document};
use serde_json::{Map, Value};

/// Convert a BSON value to plain JSON
pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(id) => Value::String(id.to_hex()),
        Bson::DateTime(dt) => match dt.try_to_rfc3339_string() {
            Ok(s) => Value::String(s),
            Err(_) => Value::from(dt.timestamp_millis()),
        },
        Bson::Document(doc) => document_to_json(doc),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}

/// Convert a document to a JSON object
pub fn document_to_json(doc: Document) -> Value {
    let map: Map<String, Value> = doc
        .into_iter()
        .map(|(k, v)| (k, bson_to_json(v)))
        .collect();
    Value::Object(map)
}

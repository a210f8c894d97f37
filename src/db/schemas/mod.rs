//! Persisted record shapes for the system collections

mod keyval;
mod queue;

pub use keyval::{KeyValueRecord, DEFAULT_KEYSPACE};
pub use queue::{QueueRecord, SENTINEL_TOPIC};

use crate::db::backend::IndexSpec;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<IndexSpec>;
}

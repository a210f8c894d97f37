//! Database layer
//!
//! The session abstraction, its MongoDB and in-memory implementations, and
//! the record shapes of the system collections.

pub mod backend;
pub mod json;
pub mod memory;
pub mod mongo;
pub mod query;
pub mod schemas;

pub use backend::{
    CollectionSpec, CreateOutcome, DocumentCursor, FindHints, IndexSpec, Session, StoreBackend,
    UpdateOutcome,
};
pub use memory::MemoryBackend;
pub use mongo::MongoBackend;
pub use schemas::{KeyValueRecord, QueueRecord, DEFAULT_KEYSPACE};

//! Mongo Datastore - document-store adapter over MongoDB
//!
//! Exposes a fixed document-store contract to a host framework, backed by a
//! MongoDB database or by an in-process store with the same behavior.
//!
//! ## Components
//!
//! - **Connection**: session establishment and best-effort bootstrap
//! - **CRUD**: generic document operations, scans returned as streams
//! - **Stream**: push-based document sequences, piped as JSON or collected
//! - **Queue**: durable work queue over a bounded log with topic handlers
//! - **KV**: key-value layer partitioned by keyspace
//!
//! ```no_run
//! use mongo_datastore::{Datastore, HandlerRegistry, StoreConfig};
//!
//! # async fn run() -> mongo_datastore::Result<()> {
//! let registry = HandlerRegistry::new();
//! registry.set("orders", |req: mongo_datastore::QueueRequest, done: mongo_datastore::Completion| async move {
//!     println!("order: {}", req.payload());
//!     done.end();
//!     Ok::<(), mongo_datastore::StoreError>(())
//! });
//!
//! let store = Datastore::connect(StoreConfig::default(), registry).await?;
//! store.enqueue("orders", bson::doc! { "item": "pen" }).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod crud;
pub mod datastore;
pub mod db;
pub mod kv;
pub mod queue;
pub mod stream;
pub mod types;

pub use config::StoreConfig;
pub use connection::{BootstrapReport, ConnectionManager, StepOutcome};
pub use crud::{CollectionHandle, Count, CrudEngine, InsertInput, InsertOutcome, Query};
pub use datastore::Datastore;
pub use db::{FindHints, MemoryBackend, MongoBackend, Session, StoreBackend};
pub use kv::{KeyValueStore, KvOptions};
pub use queue::{Completion, HandlerRegistry, QueueEngine, QueueHandler, QueueRequest};
pub use stream::{BufferSink, ChannelSink, DocumentStream, ResponseSink, StreamEvent};
pub use types::{Result, StoreError};

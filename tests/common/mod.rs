//! Shared helpers for datastore integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mongo_datastore::{Datastore, HandlerRegistry, MemoryBackend, Session, StoreConfig};

/// How long a test waits for the queue consumer before failing
pub const WAIT: Duration = Duration::from_secs(2);

pub fn test_config() -> StoreConfig {
    StoreConfig {
        tail_retry_ms: 50,
        ..StoreConfig::default()
    }
}

/// Datastore over a fresh in-memory backend, plus a handle on the backend
pub async fn memory_store(registry: HandlerRegistry) -> (Datastore, MemoryBackend) {
    let memory = MemoryBackend::new();
    let session: Session = Arc::new(memory.clone());
    let store = Datastore::with_session(session, test_config(), registry)
        .await
        .unwrap();
    (store, memory)
}

//! Topic handlers and their completion handle

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bson::Bson;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::types::Result;

/// Body handed to a queue handler
#[derive(Debug, Clone, PartialEq)]
pub struct QueueBody {
    pub payload: Bson,
}

/// Request handed to a queue handler: `{ body: { payload } }`
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRequest {
    pub body: QueueBody,
}

impl QueueRequest {
    pub fn new(payload: Bson) -> Self {
        Self {
            body: QueueBody { payload },
        }
    }

    pub fn payload(&self) -> &Bson {
        &self.body.payload
    }
}

/// Releases the queue consumer for the next record
///
/// Call [`Completion::end`] when the record is handled. The consumer stays
/// paused until then; dropping the handle without calling `end` also releases
/// it, with a warning.
pub struct Completion {
    tx: Option<oneshot::Sender<()>>,
    topic: String,
}

impl Completion {
    pub(crate) fn new(topic: &str) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Some(tx),
                topic: topic.to_string(),
            },
            rx,
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Signal that the record is handled
    pub fn end(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            warn!(topic = %self.topic, "Queue handler dropped its completion without end()");
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("topic", &self.topic)
            .field("pending", &self.tx.is_some())
            .finish()
    }
}

/// Handler for the records of one topic
#[async_trait]
pub trait QueueHandler: Send + Sync + 'static {
    async fn handle(&self, request: QueueRequest, completion: Completion) -> Result<()>;
}

#[async_trait]
impl<F, Fut> QueueHandler for F
where
    F: Fn(QueueRequest, Completion) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, request: QueueRequest, completion: Completion) -> Result<()> {
        (self)(request, completion).await
    }
}

/// Topic to handler mapping shared between the host and the queue engine
///
/// Registration is last-write-wins.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<String, Arc<dyn QueueHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`, returning true if one was replaced
    pub fn set<H: QueueHandler>(&self, topic: impl Into<String>, handler: H) -> bool {
        let topic = topic.into();
        let replaced = self
            .handlers
            .insert(topic.clone(), Arc::new(handler))
            .is_some();
        if replaced {
            info!(topic = %topic, "Replaced queue handler");
        } else {
            debug!(topic = %topic, "Registered queue handler");
        }
        replaced
    }

    pub fn get(&self, topic: &str) -> Option<Arc<dyn QueueHandler>> {
        self.handlers.get(topic).map(|h| Arc::clone(h.value()))
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("topics", &self.topics())
            .finish()
    }
}

//! Tail consumer
//!
//! One loop per process. It pulls the next pending record only after the
//! previous one was released, so at most one handler is in flight.

use std::time::Duration;

use bson::{doc, Document};
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handler::{Completion, HandlerRegistry, QueueRequest};
use crate::db::{DocumentCursor, QueueRecord, Session};
use crate::types::{Result, StoreError};

pub(crate) struct Consumer {
    pub(crate) session: Session,
    pub(crate) registry: HandlerRegistry,
    pub(crate) collection: String,
    pub(crate) retry: Duration,
}

impl Consumer {
    pub(crate) async fn run(self) {
        info!(collection = %self.collection, "Queue consumer started");
        loop {
            match self
                .session
                .tail(&self.collection, QueueRecord::pending_filter())
                .await
            {
                Ok(mut cursor) => {
                    if let Err(e) = self.drain(&mut cursor).await {
                        error!(collection = %self.collection, "Queue tail failed: {}", e);
                    } else {
                        // Idle tailable cursors are closed by the server routinely
                        debug!(collection = %self.collection, "Queue tail closed, reopening");
                    }
                }
                Err(e) => {
                    error!(collection = %self.collection, "Failed to open queue tail: {}", e);
                }
            }
            tokio::time::sleep(self.retry).await;
        }
    }

    /// Process records until the cursor ends or fails
    async fn drain(&self, cursor: &mut DocumentCursor) -> Result<()> {
        while let Some(item) = cursor.next().await {
            self.process(item?).await;
        }
        Ok(())
    }

    /// Take one record: mark it processed, then dispatch and wait for release
    async fn process(&self, doc: Document) {
        let record: QueueRecord = match bson::from_document(doc) {
            Ok(record) => record,
            Err(e) => {
                error!(collection = %self.collection, "Skipping malformed queue record: {}", e);
                return;
            }
        };
        let Some(id) = record.id else {
            warn!(collection = %self.collection, "Skipping queue record without _id");
            return;
        };

        // Marked before dispatch: a failed handler never sees the record again.
        if let Err(e) = self
            .session
            .update_one(
                &self.collection,
                doc! { "_id": id },
                QueueRecord::mark_processed(),
                false,
            )
            .await
        {
            error!(id = %id, "Failed to mark queue record processed: {}", e);
            return;
        }

        let topic = record.topic;
        let Some(handler) = self.registry.get(&topic) else {
            warn!(topic = %topic, id = %id, "Missing queue topic handler");
            return;
        };

        debug!(topic = %topic, id = %id, "Dispatching queue record");
        let (completion, released) = Completion::new(&topic);
        let request = QueueRequest::new(record.payload);
        let task = tokio::spawn(async move { handler.handle(request, completion).await });
        wait_for_release(&topic, released, task).await;
        debug!(topic = %topic, id = %id, "Queue record released");
    }
}

/// Wait until the handler ends its completion or fails
async fn wait_for_release(
    topic: &str,
    mut released: oneshot::Receiver<()>,
    mut task: JoinHandle<Result<()>>,
) {
    tokio::select! {
        biased;

        joined = &mut task => match joined {
            // Returned normally; the completion may still be held elsewhere
            Ok(Ok(())) => {
                let _ = released.await;
            }
            Ok(Err(e)) => {
                let fault = StoreError::Handler(e.to_string());
                error!(topic = %topic, "{}", fault);
            }
            Err(e) => {
                let fault = StoreError::Handler(format!("handler task aborted: {}", e));
                error!(topic = %topic, "{}", fault);
            }
        },
        _ = &mut released => {}
    }
}

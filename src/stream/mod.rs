//! Stream Emitter
//!
//! Turns a backend cursor into a push sequence of [`StreamEvent`]s produced by
//! a background task. The sequence is lazy, finite, forward-only and consumed
//! by value, through one of two adapters:
//!
//! - [`DocumentStream::pipe`] writes a JSON array into a [`ResponseSink`]
//! - [`DocumentStream::to_vec`] materializes every document in arrival order
//!
//! `DocumentStream` is also a `futures::Stream` of `Result<Document>` for
//! callers that want to drive it themselves.

mod sink;

pub use sink::{BufferSink, ChannelSink, ResponseSink};

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bson::Document;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::db::DocumentCursor;
use crate::types::{Result, StoreError};

/// Events buffered between the producing task and the consumer
pub const STREAM_BUFFER: usize = 64;

/// One step of a document stream
#[derive(Debug)]
pub enum StreamEvent {
    /// One document
    Data(Document),
    /// Terminal failure
    Error(StoreError),
    /// Terminal success
    End,
}

/// Push-based document sequence fed by a background scan
pub struct DocumentStream {
    rx: mpsc::Receiver<StreamEvent>,
    done: bool,
}

impl DocumentStream {
    /// Start a scan on a background task
    ///
    /// `open` is not polled until the task has yielded once, so the caller
    /// gets the stream back and picks a consumer before the first event.
    pub fn spawn<F>(open: F) -> Self
    where
        F: Future<Output = Result<DocumentCursor>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(produce(open, tx));
        Self { rx, done: false }
    }

    /// Stream an already-open cursor
    pub fn from_cursor(cursor: DocumentCursor) -> Self {
        Self::spawn(async move { Ok(cursor) })
    }

    /// Next event; `None` once a terminal event has been delivered
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.done {
            return None;
        }
        let event = match self.rx.recv().await {
            Some(event) => event,
            None => StreamEvent::Error(producer_gone()),
        };
        if !matches!(event, StreamEvent::Data(_)) {
            self.done = true;
        }
        Some(event)
    }

    /// Collect every document in arrival order
    pub async fn to_vec(mut self) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Data(doc) => docs.push(doc),
                StreamEvent::Error(err) => return Err(err),
                StreamEvent::End => break,
            }
        }
        Ok(docs)
    }

    /// Write the stream into `sink` as a JSON array
    ///
    /// Returns the number of documents written. On a mid-stream failure the
    /// partial array stays in the sink, followed by an `{"error": ...}` object
    /// and a 500 status, and the failure is returned.
    pub async fn pipe<S>(self, sink: &mut S) -> Result<u64>
    where
        S: ResponseSink + ?Sized,
    {
        sink::write_json_array(self, sink).await
    }

    /// Alias of [`DocumentStream::pipe`]
    pub async fn json<S>(self, sink: &mut S) -> Result<u64>
    where
        S: ResponseSink + ?Sized,
    {
        self.pipe(sink).await
    }
}

impl Stream for DocumentStream {
    type Item = Result<Document>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Data(doc))) => Poll::Ready(Some(Ok(doc))),
            Poll::Ready(Some(StreamEvent::End)) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(StreamEvent::Error(err))) => {
                self.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(Some(Err(producer_gone())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

fn producer_gone() -> StoreError {
    StoreError::Stream("stream producer stopped before end".into())
}

/// Mid-scan failures become stream faults carrying the store's text
fn stream_fault(err: StoreError) -> StoreError {
    match err {
        StoreError::Stream(_) => err,
        StoreError::Database(msg) => StoreError::Stream(msg),
        other => StoreError::Stream(other.to_string()),
    }
}

async fn produce<F>(open: F, tx: mpsc::Sender<StreamEvent>)
where
    F: Future<Output = Result<DocumentCursor>> + Send + 'static,
{
    tokio::task::yield_now().await;

    let mut cursor = match open.await {
        Ok(cursor) => cursor,
        Err(err) => {
            error!("Failed to open scan: {}", err);
            let _ = tx.send(StreamEvent::Error(err)).await;
            return;
        }
    };

    debug!("cursor start");
    let mut count: u64 = 0;
    while let Some(item) = cursor.next().await {
        match item {
            Ok(doc) => {
                if tx.send(StreamEvent::Data(doc)).await.is_err() {
                    debug!(count, "Stream consumer dropped, abandoning scan");
                    return;
                }
                count += 1;
            }
            Err(err) => {
                error!("Scan failed after {} documents: {}", count, err);
                let _ = tx.send(StreamEvent::Error(stream_fault(err))).await;
                return;
            }
        }
    }
    debug!(count, "cursor end");
    let _ = tx.send(StreamEvent::End).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn cursor_of(items: Vec<Result<Document>>) -> DocumentCursor {
        futures::stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_to_vec_keeps_order() {
        let stream = DocumentStream::from_cursor(cursor_of(vec![
            Ok(doc! { "n": 1 }),
            Ok(doc! { "n": 2 }),
            Ok(doc! { "n": 3 }),
        ]));
        let docs = stream.to_vec().await.unwrap();
        let ns: Vec<i32> = docs.iter().map(|d| d.get_i32("n").unwrap()).collect();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_to_vec_propagates_fault() {
        let stream = DocumentStream::from_cursor(cursor_of(vec![
            Ok(doc! { "n": 1 }),
            Err(StoreError::Database("cursor killed".into())),
        ]));
        let err = stream.to_vec().await.unwrap_err();
        assert_eq!(err, StoreError::Stream("cursor killed".into()));
    }

    #[tokio::test]
    async fn test_open_failure_is_terminal_event() {
        let mut stream =
            DocumentStream::spawn(async { Err(StoreError::Database("no session".into())) });
        match stream.next_event().await {
            Some(StreamEvent::Error(err)) => {
                assert_eq!(err, StoreError::Database("no session".into()))
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_events_end_once() {
        let mut stream = DocumentStream::from_cursor(cursor_of(vec![Ok(doc! { "n": 1 })]));
        assert!(matches!(stream.next_event().await, Some(StreamEvent::Data(_))));
        assert!(matches!(stream.next_event().await, Some(StreamEvent::End)));
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_trait_adapter() {
        let stream = DocumentStream::from_cursor(cursor_of(vec![
            Ok(doc! { "n": 1 }),
            Ok(doc! { "n": 2 }),
        ]));
        let items: Vec<Result<Document>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.is_ok()));
    }

    #[tokio::test]
    async fn test_scan_waits_for_caller() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let opened = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&opened);
        let stream = DocumentStream::spawn(async move {
            flag.store(true, Ordering::SeqCst);
            Ok(cursor_of(vec![]))
        });
        // Nothing has run yet on the current-thread runtime
        assert!(!opened.load(Ordering::SeqCst));
        assert!(stream.to_vec().await.unwrap().is_empty());
        assert!(opened.load(Ordering::SeqCst));
    }
}

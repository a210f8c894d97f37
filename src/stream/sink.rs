//! Response sinks and the JSON array writer
//!
//! A `ResponseSink` is the host's response-like object. The writer emits a
//! JSON array incrementally: `[` on attach, one document per event separated
//! by `,\n`, then `]` and `end()`.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{DocumentStream, StreamEvent};
use crate::db::json::document_to_json;
use crate::types::{Result, StoreError};

const ARRAY_OPEN: &[u8] = b"[\n";
const ARRAY_CLOSE: &[u8] = b"\n]";
const SEPARATOR: &[u8] = b",\n";

/// Incremental output channel supplied by the host
#[async_trait]
pub trait ResponseSink: Send {
    async fn set_header(&mut self, _name: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn status(&mut self, code: u16) -> Result<()>;

    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    async fn end(&mut self) -> Result<()>;
}

pub(super) async fn write_json_array<S>(mut stream: DocumentStream, sink: &mut S) -> Result<u64>
where
    S: ResponseSink + ?Sized,
{
    sink.set_header("Content-Type", "application/json").await?;
    sink.write(Bytes::from_static(ARRAY_OPEN)).await?;

    let mut written: u64 = 0;
    while let Some(event) = stream.next_event().await {
        match event {
            StreamEvent::Data(doc) => {
                let mut chunk = Vec::new();
                if written > 0 {
                    chunk.extend_from_slice(SEPARATOR);
                }
                serde_json::to_writer(&mut chunk, &document_to_json(doc))?;
                sink.write(Bytes::from(chunk)).await?;
                written += 1;
            }
            StreamEvent::End => {
                sink.write(Bytes::from_static(ARRAY_CLOSE)).await?;
                sink.end().await?;
                debug!(written, "stream piped");
                return Ok(written);
            }
            StreamEvent::Error(err) => {
                error!("Stream failed after {} documents: {}", written, err);
                let body = serde_json::to_vec(&json!({ "error": err.to_string() }))?;
                sink.write(Bytes::from(body)).await?;
                sink.status(500).await?;
                sink.end().await?;
                return Err(err);
            }
        }
    }
    Ok(written)
}

// ============================================================================
// Buffer sink
// ============================================================================

/// Sink that keeps the whole response in memory
#[derive(Debug)]
pub struct BufferSink {
    status: u16,
    headers: Vec<(String, String)>,
    body: BytesMut,
    ended: bool,
}

impl Default for BufferSink {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: BytesMut::new(),
            ended: false,
        }
    }
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

#[async_trait]
impl ResponseSink for BufferSink {
    async fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    async fn status(&mut self, code: u16) -> Result<()> {
        self.status = code;
        Ok(())
    }

    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if self.ended {
            return Err(StoreError::Sink("write after end".into()));
        }
        self.body.extend_from_slice(&chunk);
        Ok(())
    }

    async fn end(&mut self) -> Result<()> {
        self.ended = true;
        Ok(())
    }
}

// ============================================================================
// Channel sink
// ============================================================================

/// Sink that forwards each chunk to a receiver, e.g. a streaming HTTP body
///
/// `end()` closes the channel.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Bytes>>,
    status: u16,
}

impl ChannelSink {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx: Some(tx),
                status: 200,
            },
            rx,
        )
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    async fn status(&mut self, code: u16) -> Result<()> {
        self.status = code;
        Ok(())
    }

    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| StoreError::Sink("write after end".into()))?;
        tx.send(chunk)
            .await
            .map_err(|_| StoreError::Sink("receiver dropped".into()))
    }

    async fn end(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

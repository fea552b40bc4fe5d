//! Transport over an HTTP streaming endpoint
//!
//! For workers that are remote services rather than spawned subprocesses.
//! Incoming messages arrive as newline-delimited JSON on a long-lived
//! streaming response body (opened with `GET <endpoint>`); outgoing messages
//! are POSTed to the same endpoint. Framing and skip-on-noise semantics match
//! the stdio transport exactly.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::Mutex;

use super::{decode_line, Transport};
use crate::error::WorkerError;
use crate::protocol::Message;

struct IncomingBody {
    stream: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    /// Carries a partial line between chunks.
    buf: Vec<u8>,
}

/// Line-delimited JSON over a streaming HTTP response.
pub struct HttpStreamTransport {
    worker: String,
    endpoint: String,
    client: reqwest::Client,
    incoming: Mutex<Option<IncomingBody>>,
    closed: AtomicBool,
}

impl HttpStreamTransport {
    /// Open the receive stream for a remote worker.
    pub async fn connect(worker: &str, endpoint: &str) -> Result<Self, WorkerError> {
        let client = reqwest::Client::new();
        let response = client
            .get(endpoint)
            .header(reqwest::header::ACCEPT, "application/x-ndjson")
            .send()
            .await
            .map_err(|e| WorkerError::TransportClosed {
                reason: format!("failed to open stream to {endpoint}: {e}"),
            })?
            .error_for_status()
            .map_err(|e| WorkerError::TransportClosed {
                reason: format!("stream endpoint {endpoint} refused: {e}"),
            })?;

        Ok(Self {
            worker: worker.to_string(),
            endpoint: endpoint.to_string(),
            client,
            incoming: Mutex::new(Some(IncomingBody {
                stream: response.bytes_stream().boxed(),
                buf: Vec::new(),
            })),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for HttpStreamTransport {
    async fn send(&self, message: &Message) -> Result<(), WorkerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkerError::TransportClosed {
                reason: "transport closed".into(),
            });
        }
        self.client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| WorkerError::TransportClosed {
                reason: format!("failed to post to {}: {e}", self.endpoint),
            })?
            .error_for_status()
            .map_err(|e| WorkerError::TransportClosed {
                reason: format!("endpoint {} refused message: {e}", self.endpoint),
            })?;
        Ok(())
    }

    async fn recv(&self) -> Option<Message> {
        let mut guard = self.incoming.lock().await;
        let body = guard.as_mut()?;

        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            // Emit any complete line already buffered.
            if let Some(pos) = body.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = body.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                if let Some(msg) = decode_line(&self.worker, &line) {
                    return Some(msg);
                }
                continue;
            }
            match body.stream.next().await {
                Some(Ok(chunk)) => body.buf.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    tracing::debug!(worker = %self.worker, %err, "stream read failed");
                    return None;
                }
                None => {
                    // End of stream; a trailing unterminated line is still a frame.
                    if body.buf.is_empty() {
                        return None;
                    }
                    let line = String::from_utf8_lossy(&std::mem::take(&mut body.buf)).into_owned();
                    return decode_line(&self.worker, &line);
                }
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the response body tears down the connection.
        self.incoming.lock().await.take();
        tracing::debug!(worker = %self.worker, "http transport closed");
    }
}

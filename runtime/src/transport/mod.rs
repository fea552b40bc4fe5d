//! Message framing over byte channels
//!
//! A transport moves one JSON message at a time across a byte channel,
//! independent of what the message means. Framing is newline-terminated JSON:
//! one object per line. Malformed lines are skipped rather than terminating
//! the stream, so stray diagnostic output on the protocol channel does not
//! corrupt a session.

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::protocol::Message;

pub mod http;
pub mod stdio;

pub use http::HttpStreamTransport;
pub use stdio::{forward_stderr, StdioTransport};

/// One self-delimited message at a time over some byte channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Serialize `message` to one newline-terminated JSON line and write it.
    /// Fails with [`WorkerError::TransportClosed`] once the channel is no
    /// longer writable.
    async fn send(&self, message: &Message) -> Result<(), WorkerError>;

    /// Next decoded message, or `None` at end-of-stream or after `close`.
    /// Undecodable lines are skipped.
    async fn recv(&self) -> Option<Message>;

    /// Idempotent; safe to call from a different task than the reader.
    async fn close(&self);
}

/// Decode one line into a message, skipping blanks and non-protocol noise.
pub(crate) fn decode_line(worker: &str, line: &str) -> Option<Message> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Message>(trimmed) {
        Ok(msg) => Some(msg),
        Err(err) => {
            tracing::trace!(worker, %err, line = trimmed, "skipping non-protocol line");
            None
        }
    }
}

/// Serialize a message as one wire line (newline included).
pub(crate) fn encode_line(message: &Message) -> Result<String, WorkerError> {
    let mut line = serde_json::to_string(message).map_err(|e| WorkerError::Protocol {
        reason: format!("failed to serialize message: {e}"),
    })?;
    line.push('\n');
    Ok(line)
}

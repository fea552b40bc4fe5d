//! Transport over a child process's stdio pipes
//!
//! stdout is the sole protocol channel; stderr is diagnostic text and is
//! never parsed as protocol. The supervisor owns the process handle; this
//! type only owns the pipes.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use super::{decode_line, encode_line, Transport};
use crate::error::WorkerError;
use crate::protocol::Message;

/// Line-delimited JSON over a spawned worker's stdin/stdout.
pub struct StdioTransport {
    worker: String,
    writer: Mutex<Option<ChildStdin>>,
    reader: Mutex<Option<BufReader<ChildStdout>>>,
    closed: AtomicBool,
}

impl StdioTransport {
    pub fn new(worker: &str, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            worker: worker.to_string(),
            writer: Mutex::new(Some(stdin)),
            reader: Mutex::new(Some(BufReader::new(stdout))),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &Message) -> Result<(), WorkerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkerError::TransportClosed {
                reason: "transport closed".into(),
            });
        }
        let line = encode_line(message)?;

        let mut writer = self.writer.lock().await;
        let stdin = writer.as_mut().ok_or_else(|| WorkerError::TransportClosed {
            reason: "stdin already closed".into(),
        })?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| WorkerError::TransportClosed {
                reason: format!("failed to write to worker stdin: {e}"),
            })?;
        stdin.flush().await.map_err(|e| WorkerError::TransportClosed {
            reason: format!("failed to flush worker stdin: {e}"),
        })?;
        Ok(())
    }

    async fn recv(&self) -> Option<Message> {
        let mut reader = self.reader.lock().await;
        let stdout = reader.as_mut()?;

        let mut line = String::new();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            line.clear();
            match stdout.read_line(&mut line).await {
                Ok(0) => return None,
                Ok(_) => {
                    if let Some(msg) = decode_line(&self.worker, &line) {
                        return Some(msg);
                    }
                }
                Err(err) => {
                    tracing::debug!(worker = %self.worker, %err, "worker stdout read failed");
                    return None;
                }
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping stdin is the shutdown signal to a well-behaved worker.
        let mut writer = self.writer.lock().await;
        if let Some(mut stdin) = writer.take() {
            let _ = stdin.shutdown().await;
        }
        tracing::debug!(worker = %self.worker, "stdio transport closed");
    }
}

/// Drain a worker's stderr into the diagnostic log, line by line.
///
/// Spawned once per worker at startup; the task ends when the pipe does.
pub fn forward_stderr(worker: &str, stderr: ChildStderr) {
    let worker = worker.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(worker = %worker, "stderr: {line}");
        }
    });
}

//! Runtime error types
//!
//! One error enum covers the whole runtime. The supervisor converts these
//! into error `ToolCallResult`s at its public boundary, so callers only ever
//! see typed errors from the lower layers (transport, client, policy).

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the tool-invocation runtime.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker process could not be spawned.
    #[error("failed to spawn worker '{worker}': {reason}")]
    SpawnFailed { worker: String, reason: String },

    /// The worker started but the `initialize` handshake did not complete.
    #[error("handshake with worker '{worker}' failed: {reason}")]
    HandshakeFailed { worker: String, reason: String },

    /// A call or connect attempt exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The byte channel to the worker is no longer usable.
    #[error("transport closed: {reason}")]
    TransportClosed { reason: String },

    /// A message violated the wire contract (bad handshake payload,
    /// unparseable result shape, and so on).
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    /// The worker answered with a JSON-RPC error response.
    #[error("worker returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// No worker owns a tool with this name.
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    /// The named worker is not registered or not connected.
    #[error("worker '{name}' is not connected")]
    WorkerUnavailable { name: String },

    /// The per-worker circuit breaker rejected the call without dispatching.
    #[error("circuit open for worker '{worker}', call rejected")]
    CircuitOpen { worker: String },

    /// The policy-check endpoint could not be consulted (timeout or
    /// non-success status, both treated the same).
    #[error("policy check unreachable: {reason}")]
    PolicyUnreachable { reason: String },

    /// Configuration could not be loaded or parsed.
    #[error("config error: {reason}")]
    Config { reason: String },
}

impl WorkerError {
    /// Whether the recovery layer may retry after this error.
    ///
    /// Retry is strictly a transport/infra concern: only timeouts and broken
    /// channels qualify. Circuit-open rejections, RPC errors, and local
    /// lookup failures can never change outcome on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WorkerError::Timeout { .. } | WorkerError::TransportClosed { .. }
        )
    }
}

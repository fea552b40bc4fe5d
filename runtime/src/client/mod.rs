//! Per-worker RPC client
//!
//! Turns a raw [`Transport`] into a call/response API for exactly one worker:
//! performs the `initialize` handshake, assigns correlation ids to outgoing
//! requests, and resolves pending calls when matching responses arrive.
//!
//! Many `call_tool` invocations may run concurrently on one client; sends are
//! independent and resolution is purely id-keyed, so callers never serialize
//! on the reader.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::error::WorkerError;
use crate::protocol::{Message, Method, RequestId, ToolCallResult, ToolCatalog, ToolDescriptor};
use crate::transport::Transport;

/// Default handshake deadline. Generous, because workers may be doing
/// first-run setup (dependency downloads, model loads) before they answer.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-call deadline. Tool bodies may legitimately be slow.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

type PendingTable = Mutex<HashMap<RequestId, oneshot::Sender<Result<Message, WorkerError>>>>;

/// One logical connection to one worker.
pub struct RpcClient {
    worker: String,
    transport: Arc<dyn Transport>,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
    /// Cached catalog from the last `tools/list`.
    tools: Mutex<Option<Vec<ToolDescriptor>>>,
    /// Capability info returned by the handshake.
    server_info: Mutex<Option<Value>>,
    call_timeout: Duration,
}

impl RpcClient {
    /// Start the background receive loop, then perform the handshake.
    ///
    /// Fails if the worker answers `initialize` with an error or does not
    /// answer within `connect_timeout`.
    pub async fn connect(
        worker: &str,
        transport: Arc<dyn Transport>,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, WorkerError> {
        let pending: Arc<PendingTable> = Arc::new(Mutex::new(HashMap::new()));

        {
            let worker = worker.to_string();
            let transport = transport.clone();
            let pending = pending.clone();
            tokio::spawn(async move {
                receive_loop(worker, transport, pending).await;
            });
        }

        let client = Self {
            worker: worker.to_string(),
            transport,
            pending,
            next_id: AtomicU64::new(1),
            tools: Mutex::new(None),
            server_info: Mutex::new(None),
            call_timeout,
        };

        let params = json!({
            "clientInfo": {
                "name": "toolbus",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let info = client
            .request(Method::Initialize, Some(params), connect_timeout)
            .await
            .map_err(|e| WorkerError::HandshakeFailed {
                worker: client.worker.clone(),
                reason: e.to_string(),
            })?;
        *client.server_info.lock().expect("server_info lock") = Some(info);

        client
            .notify(Method::Initialized, None)
            .await
            .map_err(|e| WorkerError::HandshakeFailed {
                worker: client.worker.clone(),
                reason: format!("failed to send initialized notification: {e}"),
            })?;

        tracing::debug!(worker = %client.worker, "handshake complete");
        Ok(client)
    }

    pub fn worker_name(&self) -> &str {
        &self.worker
    }

    /// Capability info from the handshake, if any.
    pub fn server_info(&self) -> Option<Value> {
        self.server_info.lock().expect("server_info lock").clone()
    }

    /// Fetch the worker's tool catalog, caching the last result.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, WorkerError> {
        if let Some(tools) = self.tools.lock().expect("tools lock").clone() {
            return Ok(tools);
        }
        let result = self
            .request(Method::ListTools, None, self.call_timeout)
            .await?;
        let catalog: ToolCatalog =
            serde_json::from_value(result).map_err(|e| WorkerError::Protocol {
                reason: format!("malformed tools/list result: {e}"),
            })?;
        *self.tools.lock().expect("tools lock") = Some(catalog.tools.clone());
        Ok(catalog.tools)
    }

    /// Invoke one tool under the default per-call timeout.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, WorkerError> {
        self.call_tool_with_timeout(name, arguments, self.call_timeout)
            .await
    }

    /// Invoke one tool under an explicit deadline. On timeout the pending
    /// entry is removed and a late response is dropped as unmatched; the
    /// request itself is not retracted on the wire.
    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolCallResult, WorkerError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self
            .request(Method::CallTool, Some(params), timeout)
            .await?;
        serde_json::from_value(result).map_err(|e| WorkerError::Protocol {
            reason: format!("malformed tools/call result: {e}"),
        })
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<(), WorkerError> {
        self.request(Method::Ping, None, self.call_timeout).await?;
        Ok(())
    }

    /// Send a request and suspend until the receive loop resolves its id or
    /// the deadline elapses. Returns the response's `result` payload.
    pub async fn request(
        &self,
        method: Method,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, WorkerError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock")
            .insert(id.clone(), tx);
        // Clears the slot on every exit from this function, including
        // cancellation of this future mid-await; a no-op when the receive
        // loop already resolved and removed the id.
        let _slot = PendingSlot {
            pending: self.pending.as_ref(),
            id: id.clone(),
        };

        let message = Message::request(id.clone(), method, params);
        self.transport.send(&message).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(response))) => {
                if let Some(error) = response.error {
                    return Err(WorkerError::Rpc {
                        code: error.code,
                        message: error.message,
                    });
                }
                Ok(response.result.unwrap_or(Value::Null))
            }
            Ok(Ok(Err(e))) => Err(e),
            // Sender dropped without resolving; only happens when the
            // receive loop itself is gone.
            Ok(Err(_)) => Err(WorkerError::TransportClosed {
                reason: "connection closed".into(),
            }),
            Err(_) => Err(WorkerError::Timeout {
                operation: method.as_str().to_string(),
                after: timeout,
            }),
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: Method, params: Option<Value>) -> Result<(), WorkerError> {
        self.transport
            .send(&Message::notification(method, params))
            .await
    }

    /// Close the underlying transport. The receive loop drains on its own,
    /// resolving every still-pending caller with a connection-closed error.
    pub async fn close(&self) {
        self.transport.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }
}

/// Owns one request's pending-table slot for the duration of `request`.
/// Dropping it removes the slot, so a caller that is cancelled against a
/// silent worker does not leak an entry until EOF.
struct PendingSlot<'a> {
    pending: &'a PendingTable,
    id: RequestId,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut table) = self.pending.lock() {
            table.remove(&self.id);
        }
    }
}

/// The receive loop's sole job: decode each incoming message, find its id in
/// the pending table, and resolve that one caller. Unmatched ids are dropped.
async fn receive_loop(worker: String, transport: Arc<dyn Transport>, pending: Arc<PendingTable>) {
    while let Some(message) = transport.recv().await {
        if !message.is_response() {
            tracing::trace!(worker, "ignoring non-response message from worker");
            continue;
        }
        let Some(id) = message.id.clone() else {
            continue;
        };
        let slot = pending.lock().expect("pending lock").remove(&id);
        match slot {
            Some(tx) => {
                let _ = tx.send(Ok(message));
            }
            None => {
                tracing::trace!(worker, %id, "dropping unmatched response");
            }
        }
    }

    // End of stream: every outstanding caller gets a connection-closed error.
    let drained: Vec<_> = pending
        .lock()
        .expect("pending lock")
        .drain()
        .map(|(_, tx)| tx)
        .collect();
    for tx in drained {
        let _ = tx.send(Err(WorkerError::TransportClosed {
            reason: "connection closed".into(),
        }));
    }
    tracing::debug!(worker, "receive loop ended");
}

//! In-memory transports for unit tests
//!
//! `ChannelTransport` gives a test manual control over both directions of the
//! wire. `ScriptedWorker` plays a whole worker: it answers the handshake and
//! catalog queries itself and delegates `tools/call` to a closure.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::error::WorkerError;
use crate::protocol::{
    Message, Method, RpcError, ToolCallResult, ToolDescriptor, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use crate::transport::Transport;

/// A transport wired to a pair of channels the test holds the far ends of.
pub(crate) struct ChannelTransport {
    /// client -> test
    outgoing: UnboundedSender<Message>,
    /// test -> client
    incoming: Mutex<UnboundedReceiver<Message>>,
    closed: AtomicBool,
}

impl ChannelTransport {
    /// Returns the transport plus the test-side handles: a receiver of
    /// everything the client sends, and a sender for injecting responses.
    pub(crate) fn new() -> (
        Self,
        UnboundedReceiver<Message>,
        UnboundedSender<Message>,
    ) {
        let (out_tx, out_rx) = unbounded_channel();
        let (in_tx, in_rx) = unbounded_channel();
        (
            Self {
                outgoing: out_tx,
                incoming: Mutex::new(in_rx),
                closed: AtomicBool::new(false),
            },
            out_rx,
            in_tx,
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: &Message) -> Result<(), WorkerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkerError::TransportClosed {
                reason: "transport closed".into(),
            });
        }
        self.outgoing
            .send(message.clone())
            .map_err(|_| WorkerError::TransportClosed {
                reason: "test harness dropped the wire".into(),
            })
    }

    async fn recv(&self) -> Option<Message> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.incoming.lock().await.recv().await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

type CallHandler =
    dyn Fn(&str, &Value) -> Result<ToolCallResult, RpcError> + Send + Sync + 'static;

/// A self-contained fake worker behind the transport seam.
///
/// Answers `initialize`, `tools/list`, and `ping` itself; `tools/call` is
/// routed to the provided handler. Counts handled calls so tests can assert
/// a breaker stopped dispatching.
pub(crate) struct ScriptedWorker {
    tools: Vec<ToolDescriptor>,
    handler: Box<CallHandler>,
    responses: UnboundedSender<Message>,
    inbox: Mutex<UnboundedReceiver<Message>>,
    closed: AtomicBool,
    pub(crate) calls: Arc<AtomicU32>,
}

impl ScriptedWorker {
    pub(crate) fn new<F>(tool_names: &[&str], handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<ToolCallResult, RpcError> + Send + Sync + 'static,
    {
        let (tx, rx) = unbounded_channel();
        Self {
            tools: tool_names
                .iter()
                .map(|name| ToolDescriptor {
                    name: name.to_string(),
                    description: None,
                    input_schema: Some(json!({"type": "object"})),
                })
                .collect(),
            handler: Box::new(handler),
            responses: tx,
            inbox: Mutex::new(rx),
            closed: AtomicBool::new(false),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn answer(&self, request: &Message) -> Option<Message> {
        let id = request.id.clone()?;
        let method = request.method?;
        let response = match method {
            Method::Initialize => {
                Message::response(id, json!({"serverInfo": {"name": "scripted"}}))
            }
            Method::ListTools => Message::response(
                id,
                json!({"tools": serde_json::to_value(&self.tools).unwrap()}),
            ),
            Method::Ping => Message::response(id, json!({})),
            Method::CallTool => {
                self.calls.fetch_add(1, Ordering::Relaxed);
                let params = request.params.clone().unwrap_or(Value::Null);
                let name = params["name"].as_str().unwrap_or_default().to_string();
                let args = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or(Value::Null);
                if !self.tools.iter().any(|t| t.name == name) {
                    Message::error_response(
                        id,
                        RpcError::new(INVALID_PARAMS, format!("unknown tool '{name}'")),
                    )
                } else {
                    match (self.handler)(&name, &args) {
                        Ok(result) => {
                            Message::response(id, serde_json::to_value(result).unwrap())
                        }
                        Err(error) => Message::error_response(id, error),
                    }
                }
            }
            Method::Initialized => {
                Message::error_response(id, RpcError::new(METHOD_NOT_FOUND, "not a request"))
            }
        };
        Some(response)
    }
}

#[async_trait]
impl Transport for ScriptedWorker {
    async fn send(&self, message: &Message) -> Result<(), WorkerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkerError::TransportClosed {
                reason: "transport closed".into(),
            });
        }
        if let Some(response) = self.answer(message) {
            let _ = self.responses.send(response);
        }
        Ok(())
    }

    async fn recv(&self) -> Option<Message> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.inbox.lock().await.recv().await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

//! Wire protocol for worker communication
//!
//! Defines the message envelope and data contracts exchanged with worker
//! processes over line-delimited JSON-RPC. Pure data: no I/O, no behavior.
//! Any two endpoints implementing these shapes interoperate regardless of
//! what language either side is written in.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version carried in every envelope.
pub const PROTOCOL_VERSION: &str = "2.0";

// Standard JSON-RPC error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Correlation identifier for a request.
///
/// The runtime issues integer ids, but string ids from foreign endpoints are
/// accepted and matched verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

/// The closed set of methods a worker must understand.
///
/// Adding a method is a compile-time-checked change: every match over
/// `Method` is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// Handshake; returns capability info.
    #[serde(rename = "initialize")]
    Initialize,
    /// Catalog query; returns `{"tools": [ToolDescriptor, ...]}`.
    #[serde(rename = "tools/list")]
    ListTools,
    /// Tool invocation; params `{"name": str, "arguments": object}`.
    #[serde(rename = "tools/call")]
    CallTool,
    /// Liveness probe; empty result.
    #[serde(rename = "ping")]
    Ping,
    /// Lifecycle notification sent after a successful handshake.
    #[serde(rename = "notifications/initialized")]
    Initialized,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Initialize => "initialize",
            Method::ListTools => "tools/list",
            Method::CallTool => "tools/call",
            Method::Ping => "ping",
            Method::Initialized => "notifications/initialized",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON-RPC error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Wire envelope: one JSON object per line.
///
/// A request carries `id` + `method`; a notification carries `method` but no
/// `id`; a response carries `id` and exactly one of `result`/`error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Message {
    pub fn request(id: impl Into<RequestId>, method: Method, params: Option<Value>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: Some(id.into()),
            method: Some(method),
            params,
            result: None,
            error: None,
        }
    }

    pub fn notification(method: Method, params: Option<Value>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: None,
            method: Some(method),
            params,
            result: None,
            error: None,
        }
    }

    pub fn response(id: RequestId, result: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error_response(id: RequestId, error: RpcError) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_request(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    pub fn is_response(&self) -> bool {
        self.id.is_some()
            && self.method.is_none()
            && (self.result.is_some() || self.error.is_some())
    }
}

/// A tool announced by a worker. Names are unique within one worker, not
/// globally; the descriptor is read-only once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Result payload of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCatalog {
    pub tools: Vec<ToolDescriptor>,
}

/// One piece of tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded bytes.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Structured {
        payload: Value,
    },
    File {
        uri: String,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// Outcome of a tool call that completed a full round trip.
///
/// `is_error=true` means the tool itself reported failure; transport and
/// protocol failures never produce a `ToolCallResult` at this layer. An empty
/// `content` list is legal and means "no output".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Concatenated text of all textual parts; structured and binary parts
    /// are rendered as JSON/placeholders for display purposes.
    pub fn text_content(&self) -> String {
        let mut out = Vec::new();
        for part in &self.content {
            match part {
                ContentPart::Text { text } => out.push(text.clone()),
                ContentPart::Structured { payload } => {
                    out.push(payload.to_string());
                }
                ContentPart::Image { mime_type, .. } => {
                    out.push(format!("<image {}>", mime_type));
                }
                ContentPart::File { uri, .. } => out.push(format!("<file {}>", uri)),
            }
        }
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_shape() {
        let msg = Message::request(1u64, Method::CallTool, Some(json!({"name": "echo"})));
        assert!(msg.is_request());
        assert!(!msg.is_response());
        assert!(!msg.is_notification());

        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["version"], "2.0");
        assert_eq!(wire["method"], "tools/call");
        assert_eq!(wire["id"], 1);
        // Absent fields stay off the wire entirely.
        assert!(wire.get("result").is_none());
        assert!(wire.get("error").is_none());
    }

    #[test]
    fn notification_has_no_id() {
        let msg = Message::notification(Method::Initialized, None);
        assert!(msg.is_notification());
        let wire = serde_json::to_value(&msg).unwrap();
        assert!(wire.get("id").is_none());
    }

    #[test]
    fn response_classification() {
        let ok = Message::response(RequestId::Number(7), json!({"ok": true}));
        assert!(ok.is_response());

        let err = Message::error_response(
            RequestId::Text("abc".into()),
            RpcError::new(METHOD_NOT_FOUND, "no such method"),
        );
        assert!(err.is_response());
        assert_eq!(err.error.as_ref().unwrap().code, METHOD_NOT_FOUND);
    }

    #[test]
    fn request_id_accepts_strings_and_ints() {
        let n: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(n, RequestId::Number(42));
        let s: RequestId = serde_json::from_str("\"call-9\"").unwrap();
        assert_eq!(s, RequestId::Text("call-9".into()));
    }

    #[test]
    fn content_part_tagging() {
        let parts = vec![
            ContentPart::Text { text: "hi".into() },
            ContentPart::Structured {
                payload: json!({"rows": 3}),
            },
            ContentPart::File {
                uri: "file:///tmp/out.csv".into(),
                mime_type: None,
            },
        ];
        let wire = serde_json::to_value(&parts).unwrap();
        assert_eq!(wire[0]["type"], "text");
        assert_eq!(wire[1]["type"], "structured");
        assert_eq!(wire[2]["type"], "file");

        let back: Vec<ContentPart> = serde_json::from_value(wire).unwrap();
        assert!(matches!(&back[1], ContentPart::Structured { payload } if payload["rows"] == 3));
    }

    #[test]
    fn tool_result_defaults() {
        // A worker may omit both fields; that parses as "no output, success".
        let res: ToolCallResult = serde_json::from_str("{}").unwrap();
        assert!(res.content.is_empty());
        assert!(!res.is_error);

        let res: ToolCallResult =
            serde_json::from_value(json!({"content": [], "isError": true})).unwrap();
        assert!(res.is_error);
    }

    #[test]
    fn unknown_method_fails_to_parse() {
        // The method set is closed; foreign methods are rejected at decode
        // time (and skipped by the transport, not fatal to the stream).
        let raw = r#"{"version":"2.0","id":1,"method":"resources/list"}"#;
        assert!(serde_json::from_str::<Message>(raw).is_err());
    }
}

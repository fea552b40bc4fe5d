//! A small worker used by the integration tests and as a reference for what
//! a worker must implement: read one JSON request per stdin line, answer on
//! stdout, keep diagnostics on stderr.
//!
//! Tools: `echo` reflects its arguments back, `fail` always reports a tool
//! error, `sleep` waits `ms` milliseconds. `--linger` makes the process
//! ignore stdin closing (for force-kill tests); `--abort` exits before
//! speaking the protocol (for handshake-failure tests).

use serde_json::json;
use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader};

use toolbus::protocol::{
    ContentPart, Message, Method, RpcError, ToolCallResult, ToolDescriptor, INVALID_PARAMS,
};

struct Options {
    label: String,
    linger: bool,
    abort: bool,
}

fn parse_options() -> Options {
    let mut options = Options {
        label: "echo-worker".to_string(),
        linger: false,
        abort: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--label" => {
                if let Some(label) = args.next() {
                    options.label = label;
                }
            }
            "--linger" => options.linger = true,
            "--abort" => options.abort = true,
            other => eprintln!("echo-worker: ignoring unknown argument '{other}'"),
        }
    }
    options
}

fn catalog() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "echo".into(),
            description: Some("Reflect the arguments back".into()),
            input_schema: Some(json!({"type": "object"})),
        },
        ToolDescriptor {
            name: "fail".into(),
            description: Some("Always report a tool-level error".into()),
            input_schema: Some(json!({"type": "object"})),
        },
        ToolDescriptor {
            name: "sleep".into(),
            description: Some("Wait for `ms` milliseconds".into()),
            input_schema: Some(json!({
                "type": "object",
                "properties": {"ms": {"type": "integer"}}
            })),
        },
    ]
}

async fn call(label: &str, name: &str, args: &serde_json::Value) -> Result<ToolCallResult, RpcError> {
    match name {
        "echo" => Ok(ToolCallResult {
            content: vec![
                ContentPart::Text {
                    text: format!("[{label}] {args}"),
                },
                ContentPart::Structured {
                    payload: args.clone(),
                },
            ],
            is_error: false,
        }),
        "fail" => Ok(ToolCallResult::error("this tool always fails")),
        "sleep" => {
            let ms = args.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            Ok(ToolCallResult::text(format!("slept {ms}ms")))
        }
        other => Err(RpcError::new(
            INVALID_PARAMS,
            format!("unknown tool '{other}'"),
        )),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    let options = parse_options();
    if options.abort {
        eprintln!("echo-worker: aborting before handshake");
        std::process::exit(3);
    }

    let mut out = stdout();
    // Deliberate non-protocol noise; clients must skip it.
    out.write_all(b"echo-worker starting up\n").await?;
    out.flush().await?;

    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let request: Message = match serde_json::from_str(line.trim()) {
            Ok(message) => message,
            Err(err) => {
                eprintln!("echo-worker: skipping undecodable line: {err}");
                continue;
            }
        };
        let (Some(id), Some(method)) = (request.id.clone(), request.method) else {
            // Notifications get no reply.
            continue;
        };

        let response = match method {
            Method::Initialize => Message::response(
                id,
                json!({
                    "serverInfo": {"name": options.label, "version": env!("CARGO_PKG_VERSION")},
                    "capabilities": {"tools": {}}
                }),
            ),
            Method::ListTools => Message::response(
                id,
                json!({"tools": catalog()}),
            ),
            Method::Ping => Message::response(id, json!({})),
            Method::CallTool => {
                let params = request.params.unwrap_or_default();
                let name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let args = params.get("arguments").cloned().unwrap_or(json!({}));
                match call(&options.label, name, &args).await {
                    Ok(result) => Message::response(
                        id,
                        serde_json::to_value(result)
                            .unwrap_or_else(|_| json!({"isError": true})),
                    ),
                    Err(error) => Message::error_response(id, error),
                }
            }
            Method::Initialized => continue,
        };

        let mut wire = serde_json::to_string(&response)
            .unwrap_or_else(|_| r#"{"version":"2.0"}"#.to_string());
        wire.push('\n');
        out.write_all(wire.as_bytes()).await?;
        out.flush().await?;
    }

    if options.linger {
        eprintln!("echo-worker: stdin closed, lingering");
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        }
    }
    eprintln!("echo-worker: stdin closed, exiting");
    Ok(())
}

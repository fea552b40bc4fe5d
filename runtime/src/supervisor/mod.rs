//! Worker supervisor
//!
//! The system's single public entry point. Owns the set of configured
//! workers, launches each as a subprocess (or attaches to a remote one),
//! drives its client through the handshake, merges every worker's tool
//! catalog into one name -> worker index, and routes tool calls through the
//! policy hook and the recovery layer.
//!
//! Failure semantics: an unknown tool, a disconnected worker, a policy veto,
//! an open circuit, and exhausted retries all come back as error
//! `ToolCallResult`s, never as errors from `call_tool`. Callers orchestrating
//! many calls treat every outcome uniformly as "did it say isError".

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;

use crate::client::{RpcClient, DEFAULT_CALL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT};
use crate::config::RuntimeConfig;
use crate::error::WorkerError;
use crate::policy::{FailurePosture, PolicyCheck, PolicyContext, PolicyRequest};
use crate::protocol::{ToolCallResult, ToolDescriptor};
use crate::recovery::{BreakerSettings, CircuitBreaker, RetryPolicy};
use crate::transport::{forward_stderr, HttpStreamTransport, StdioTransport, Transport};

/// Grace period between closing a worker's stdin and force-killing it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Launch description for one worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// One tool-call request, for the parallel convenience path.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub tool: String,
    pub arguments: Value,
}

/// A tool as seen in the aggregated catalog.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub worker: String,
    pub tool: ToolDescriptor,
}

/// A live connection to one worker. Exactly one exists per worker name.
struct WorkerConnection {
    client: Arc<RpcClient>,
    /// `None` for remote workers reached over HTTP.
    child: Option<Child>,
    tools: Vec<ToolDescriptor>,
    connected: bool,
}

/// The orchestrator. An explicit instance owned by the composition root;
/// several independent supervisors can coexist in one process.
pub struct Supervisor {
    workers: RwLock<HashMap<String, WorkerConnection>>,
    /// tool name -> owning worker name; last registration wins on collision.
    registry: Mutex<HashMap<String, String>>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    retry: RetryPolicy,
    breaker_settings: BreakerSettings,
    policy: Option<Arc<dyn PolicyCheck>>,
    posture: FailurePosture,
    connect_timeout: Duration,
    call_timeout: Duration,
    shutdown_grace: Duration,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            registry: Mutex::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
            retry: RetryPolicy::default(),
            breaker_settings: BreakerSettings::default(),
            policy: None,
            posture: FailurePosture::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Build a supervisor from the loaded runtime settings.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let mut supervisor = Self::new();
        supervisor.retry = config.retry_policy();
        supervisor.breaker_settings = config.breaker_settings();
        supervisor.connect_timeout = config.timeouts.connect();
        supervisor.call_timeout = config.timeouts.call();
        supervisor.shutdown_grace = config.timeouts.shutdown_grace();
        supervisor.posture = config.policy.posture;
        if let Some(endpoint) = &config.policy.endpoint {
            supervisor.policy = Some(Arc::new(
                crate::policy::HttpPolicyCheck::new(endpoint)
                    .with_timeout(config.policy.timeout()),
            ));
        }
        supervisor
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn set_breaker_settings(&mut self, settings: BreakerSettings) {
        self.breaker_settings = settings;
    }

    pub fn set_policy(&mut self, policy: Arc<dyn PolicyCheck>, posture: FailurePosture) {
        self.policy = Some(policy);
        self.posture = posture;
    }

    pub fn set_call_timeout(&mut self, timeout: Duration) {
        self.call_timeout = timeout;
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn set_shutdown_grace(&mut self, grace: Duration) {
        self.shutdown_grace = grace;
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Spawn and connect every configured worker. A worker that dies or
    /// misbehaves before completing the handshake is logged and skipped,
    /// never fatal to the rest of the batch; its failure is returned for
    /// callers that want to surface it. Starting an already-running worker
    /// is a no-op.
    pub async fn start_workers(&self, configs: Vec<WorkerConfig>) -> Vec<(String, WorkerError)> {
        let mut handles = Vec::new();
        for config in configs {
            if self.workers.read().await.contains_key(&config.name) {
                tracing::debug!(worker = %config.name, "already running, skipping");
                continue;
            }
            let connect_timeout = self.connect_timeout;
            let call_timeout = self.call_timeout;
            let name = config.name.clone();
            handles.push((
                name,
                tokio::spawn(async move {
                    spawn_worker(config, connect_timeout, call_timeout).await
                }),
            ));
        }

        // Register in config order so tool-name collisions resolve
        // deterministically (last writer wins).
        let mut failures = Vec::new();
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(connection)) => self.register(&name, connection).await,
                Ok(Err(err)) => {
                    tracing::warn!(worker = %name, error = %err, "worker failed to start, skipping");
                    failures.push((name, err));
                }
                Err(err) => {
                    tracing::warn!(worker = %name, error = %err, "worker startup task panicked");
                    failures.push((
                        name.clone(),
                        WorkerError::SpawnFailed {
                            worker: name,
                            reason: format!("startup task failed: {err}"),
                        },
                    ));
                }
            }
        }
        failures
    }

    /// Connect a worker over an already-established transport (used for
    /// remote workers; also the seam tests attach mock workers through).
    pub async fn attach_worker(
        &self,
        name: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<(), WorkerError> {
        if self.workers.read().await.contains_key(name) {
            tracing::debug!(worker = name, "already running, skipping");
            return Ok(());
        }
        let client =
            RpcClient::connect(name, transport, self.connect_timeout, self.call_timeout).await?;
        let tools = client
            .list_tools()
            .await
            .map_err(|e| WorkerError::HandshakeFailed {
                worker: name.to_string(),
                reason: format!("tool discovery failed: {e}"),
            })?;
        self.register(
            name,
            WorkerConnection {
                client: Arc::new(client),
                child: None,
                tools,
                connected: true,
            },
        )
        .await;
        Ok(())
    }

    /// Connect a remote worker speaking the protocol over an HTTP stream.
    pub async fn start_remote_worker(
        &self,
        name: &str,
        endpoint: &str,
    ) -> Result<(), WorkerError> {
        let transport = HttpStreamTransport::connect(name, endpoint).await?;
        self.attach_worker(name, Arc::new(transport)).await
    }

    async fn register(&self, name: &str, connection: WorkerConnection) {
        {
            let mut registry = self.registry.lock().expect("registry lock");
            for tool in &connection.tools {
                if let Some(previous) = registry.insert(tool.name.clone(), name.to_string()) {
                    if previous != name {
                        tracing::debug!(
                            tool = %tool.name,
                            previous = %previous,
                            now = %name,
                            "tool name collision, last registration wins"
                        );
                    }
                }
            }
        }
        self.breakers
            .lock()
            .expect("breakers lock")
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.breaker_settings.clone()));

        tracing::info!(worker = name, tools = connection.tools.len(), "worker registered");
        self.workers
            .write()
            .await
            .insert(name.to_string(), connection);
    }

    /// Best-effort shutdown of every worker: close the client (dropping the
    /// worker's stdin), wait out the grace period, force-kill stragglers,
    /// and clear all state. Never fails, even when workers are already dead.
    pub async fn stop_workers(&self) {
        let mut workers = self.workers.write().await;
        for (name, mut connection) in workers.drain() {
            connection.client.close().await;
            connection.connected = false;
            if let Some(mut child) = connection.child.take() {
                match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::debug!(worker = %name, %status, "worker exited");
                    }
                    Ok(Err(err)) => {
                        tracing::debug!(worker = %name, %err, "worker already gone");
                    }
                    Err(_) => {
                        tracing::warn!(worker = %name, "worker ignored shutdown, killing");
                        let _ = child.kill().await;
                    }
                }
            }
        }
        self.registry.lock().expect("registry lock").clear();
        self.breakers.lock().expect("breakers lock").clear();
        tracing::info!("all workers stopped");
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Invoke a tool by its global name. Every outcome is a
    /// `ToolCallResult`; inspect `is_error`.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> ToolCallResult {
        if let Some(veto) = self.policy_veto(tool, &arguments).await {
            return veto;
        }
        let owner = match self.resolve(tool) {
            Some(owner) => owner,
            None => {
                return ToolCallResult::error(
                    WorkerError::UnknownTool {
                        name: tool.to_string(),
                    }
                    .to_string(),
                )
            }
        };
        self.dispatch(&owner, tool, arguments).await
    }

    /// Invoke a tool on a specific worker, bypassing the global index.
    /// Needed when two workers expose the same tool name.
    pub async fn call_tool_on(&self, worker: &str, tool: &str, arguments: Value) -> ToolCallResult {
        if let Some(veto) = self.policy_veto(tool, &arguments).await {
            return veto;
        }
        self.dispatch(worker, tool, arguments).await
    }

    /// Unbounded fan-out over `call_tool`; results in input order. Callers
    /// that need concurrency bounds, rate limiting, or priorities use the
    /// parallel executor instead.
    pub async fn call_tools_parallel(&self, calls: Vec<ToolCallRequest>) -> Vec<ToolCallResult> {
        futures_util::future::join_all(
            calls
                .into_iter()
                .map(|call| async move { self.call_tool(&call.tool, call.arguments).await }),
        )
        .await
    }

    async fn policy_veto(&self, tool: &str, arguments: &Value) -> Option<ToolCallResult> {
        let policy = self.policy.as_ref()?;
        let request = PolicyRequest {
            operation: "tools/call".into(),
            context: PolicyContext {
                tool: tool.to_string(),
                args: arguments.clone(),
            },
        };
        match policy.check(&request).await {
            Ok(decision) if decision.passed => None,
            Ok(decision) => Some(ToolCallResult::error(format!(
                "policy denied call to '{tool}': {}",
                decision.issues.join("; ")
            ))),
            Err(err) => match self.posture {
                FailurePosture::FailOpen => {
                    tracing::warn!(tool, error = %err, "policy check unreachable, failing open");
                    None
                }
                FailurePosture::FailClosed => Some(ToolCallResult::error(format!(
                    "policy check unavailable and posture is fail-closed: {err}"
                ))),
            },
        }
    }

    async fn dispatch(&self, worker: &str, tool: &str, arguments: Value) -> ToolCallResult {
        // Worker lookup first: a bogus name must not leave breaker state
        // behind.
        let client = {
            let workers = self.workers.read().await;
            match workers.get(worker) {
                Some(connection) if connection.connected => connection.client.clone(),
                _ => {
                    return ToolCallResult::error(
                        WorkerError::WorkerUnavailable {
                            name: worker.to_string(),
                        }
                        .to_string(),
                    );
                }
            }
        };

        // Breaker admission before any I/O.
        {
            let mut breakers = self.breakers.lock().expect("breakers lock");
            let breaker = breakers
                .entry(worker.to_string())
                .or_insert_with(|| CircuitBreaker::new(self.breaker_settings.clone()));
            if !breaker.allow() {
                return ToolCallResult::error(
                    WorkerError::CircuitOpen {
                        worker: worker.to_string(),
                    }
                    .to_string(),
                );
            }
        }

        let outcome = self
            .retry
            .run(|| {
                let client = client.clone();
                let tool = tool.to_string();
                let arguments = arguments.clone();
                async move { client.call_tool(&tool, arguments).await }
            })
            .await;

        let mut breakers = self.breakers.lock().expect("breakers lock");
        let breaker = breakers
            .entry(worker.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.breaker_settings.clone()));
        match outcome {
            Ok(result) => {
                // A completed round trip is a healthy worker even when the
                // tool itself reported failure.
                breaker.record_success();
                result
            }
            Err(err) => {
                breaker.record_failure();
                ToolCallResult::error(format!(
                    "call to '{tool}' on worker '{worker}' failed: {err}"
                ))
            }
        }
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    /// Owning worker for a global tool name.
    pub fn resolve(&self, tool: &str) -> Option<String> {
        self.registry.lock().expect("registry lock").get(tool).cloned()
    }

    /// The aggregated catalog, sorted by worker then tool name.
    pub async fn list_tools(&self) -> Vec<RegisteredTool> {
        let workers = self.workers.read().await;
        let mut tools: Vec<RegisteredTool> = workers
            .iter()
            .flat_map(|(name, connection)| {
                connection.tools.iter().map(move |tool| RegisteredTool {
                    worker: name.clone(),
                    tool: tool.clone(),
                })
            })
            .collect();
        tools.sort_by(|a, b| (&a.worker, &a.tool.name).cmp(&(&b.worker, &b.tool.name)));
        tools
    }

    pub async fn worker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_worker_running(&self, name: &str) -> bool {
        self.workers.read().await.contains_key(name)
    }

    pub fn tool_count(&self) -> usize {
        self.registry.lock().expect("registry lock").len()
    }

    #[cfg(test)]
    pub(crate) fn breaker_count(&self) -> usize {
        self.breakers.lock().expect("breakers lock").len()
    }

    /// Liveness probe against one worker.
    pub async fn ping_worker(&self, name: &str) -> Result<(), WorkerError> {
        let client = {
            let workers = self.workers.read().await;
            match workers.get(name) {
                Some(connection) => connection.client.clone(),
                None => {
                    return Err(WorkerError::WorkerUnavailable {
                        name: name.to_string(),
                    })
                }
            }
        };
        client.ping().await
    }
}

/// Spawn one worker process with piped stdio and drive it through the
/// handshake. stdout is the protocol channel; stderr goes to the diagnostic
/// log. The child is killed if the handshake or tool discovery fails.
async fn spawn_worker(
    config: WorkerConfig,
    connect_timeout: Duration,
    call_timeout: Duration,
) -> Result<WorkerConnection, WorkerError> {
    tracing::debug!(worker = %config.name, command = %config.command, "starting worker");

    let mut cmd = Command::new(&config.command);
    if !config.args.is_empty() {
        cmd.args(&config.args);
    }
    for (key, value) in &config.env {
        let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
        cmd.env(key, expanded.as_ref());
    }
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| WorkerError::SpawnFailed {
        worker: config.name.clone(),
        reason: e.to_string(),
    })?;
    let stdin = child.stdin.take().ok_or_else(|| WorkerError::SpawnFailed {
        worker: config.name.clone(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| WorkerError::SpawnFailed {
        worker: config.name.clone(),
        reason: "failed to capture stdout".into(),
    })?;
    if let Some(stderr) = child.stderr.take() {
        forward_stderr(&config.name, stderr);
    }

    let transport: Arc<dyn Transport> =
        Arc::new(StdioTransport::new(&config.name, stdin, stdout));
    let client =
        match RpcClient::connect(&config.name, transport, connect_timeout, call_timeout).await {
            Ok(client) => client,
            Err(err) => {
                let _ = child.start_kill();
                return Err(err);
            }
        };

    let tools = match client.list_tools().await {
        Ok(tools) => tools,
        Err(err) => {
            let _ = child.start_kill();
            return Err(WorkerError::HandshakeFailed {
                worker: config.name.clone(),
                reason: format!("tool discovery failed: {err}"),
            });
        }
    };

    Ok(WorkerConnection {
        client: Arc::new(client),
        child: Some(child),
        tools,
        connected: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyDecision;
    use crate::protocol::{Message, Method, RpcError};
    use crate::testutil::{ChannelTransport, ScriptedWorker};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn attach(
        supervisor: &Supervisor,
        name: &str,
        worker: ScriptedWorker,
    ) -> Arc<AtomicU32> {
        let calls = worker.calls.clone();
        supervisor
            .attach_worker(name, Arc::new(worker))
            .await
            .expect("attach worker");
        calls
    }

    /// Attach a worker that completes the handshake and catalog exchange but
    /// never answers `tools/call`.
    async fn attach_unresponsive(supervisor: &Supervisor, name: &str) {
        let (transport, mut outgoing, incoming) = ChannelTransport::new();
        tokio::spawn(async move {
            while let Some(request) = outgoing.recv().await {
                let Some(id) = request.id.clone() else { continue };
                match request.method {
                    Some(Method::Initialize) => {
                        let _ = incoming
                            .send(Message::response(id, json!({"serverInfo": {"name": "mute"}})));
                    }
                    Some(Method::ListTools) => {
                        let _ = incoming
                            .send(Message::response(id, json!({"tools": [{"name": "echo"}]})));
                    }
                    Some(Method::Ping) => {
                        let _ = incoming.send(Message::response(id, json!({})));
                    }
                    _ => {}
                }
            }
        });
        supervisor
            .attach_worker(name, Arc::new(transport))
            .await
            .expect("attach unresponsive worker");
    }

    fn echo_worker(label: &'static str) -> ScriptedWorker {
        ScriptedWorker::new(&["echo"], move |_, args| {
            Ok(ToolCallResult::text(format!("[{label}] {args}")))
        })
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result_with_no_io() {
        let supervisor = Supervisor::new();
        let result = supervisor.call_tool("does_not_exist", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("unknown tool 'does_not_exist'"));
        assert!(supervisor.worker_names().await.is_empty());
    }

    #[tokio::test]
    async fn call_routes_to_owning_worker() {
        let supervisor = Supervisor::new();
        let calls = attach(&supervisor, "alpha", echo_worker("alpha")).await;

        assert_eq!(supervisor.resolve("echo").as_deref(), Some("alpha"));
        let result = supervisor.call_tool("echo", json!({"x": 1})).await;
        assert!(!result.is_error);
        assert!(result.text_content().contains("[alpha]"));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn collision_resolves_to_last_registration_with_per_worker_escape() {
        let supervisor = Supervisor::new();
        attach(&supervisor, "alpha", echo_worker("alpha")).await;
        attach(&supervisor, "beta", echo_worker("beta")).await;

        assert_eq!(supervisor.resolve("echo").as_deref(), Some("beta"));
        let global = supervisor.call_tool("echo", json!({})).await;
        assert!(global.text_content().contains("[beta]"));

        let direct = supervisor.call_tool_on("alpha", "echo", json!({})).await;
        assert!(direct.text_content().contains("[alpha]"));
    }

    #[tokio::test]
    async fn tool_level_failure_passes_through_and_is_not_retried() {
        let supervisor = Supervisor::new();
        let calls = attach(
            &supervisor,
            "flaky",
            ScriptedWorker::new(&["always_fails"], |_, _| {
                Ok(ToolCallResult::error("tool says no"))
            }),
        )
        .await;

        let result = supervisor.call_tool("always_fails", json!({})).await;
        assert!(result.is_error);
        assert_eq!(result.text_content(), "tool says no");
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn breaker_rejects_without_dispatch_once_open() {
        let mut supervisor = Supervisor::new();
        supervisor.set_breaker_settings(BreakerSettings {
            failure_threshold: 2,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        });
        supervisor.set_retry_policy(RetryPolicy::none());
        let calls = attach(
            &supervisor,
            "broken",
            ScriptedWorker::new(&["boom"], |_, _| {
                Err(RpcError::new(crate::protocol::INTERNAL_ERROR, "crashed"))
            }),
        )
        .await;

        for _ in 0..2 {
            let result = supervisor.call_tool("boom", json!({})).await;
            assert!(result.is_error);
        }
        assert_eq!(calls.load(Ordering::Relaxed), 2);

        // Circuit is now open: rejected without touching the worker.
        let result = supervisor.call_tool("boom", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("circuit open"));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_probe_does_not_wedge_the_breaker_open() {
        let mut supervisor = Supervisor::new();
        supervisor.set_retry_policy(RetryPolicy::none());
        supervisor.set_breaker_settings(BreakerSettings {
            failure_threshold: 1,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(5),
        });
        supervisor.set_call_timeout(Duration::from_secs(1));
        attach_unresponsive(&supervisor, "mute").await;

        // The worker never answers, so the first call times out and trips
        // the breaker.
        let result = supervisor.call_tool("echo", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("timed out"));

        tokio::time::advance(Duration::from_secs(6)).await;

        // The probe's caller gives up and drops the call future before the
        // probe resolves; no outcome is ever recorded for it.
        let probe = tokio::time::timeout(
            Duration::from_millis(10),
            supervisor.call_tool("echo", json!({})),
        )
        .await;
        assert!(probe.is_err());

        tokio::time::advance(Duration::from_secs(6)).await;

        // A fresh probe must be admitted: the failure is a timeout again,
        // never a circuit-open rejection.
        let result = supervisor.call_tool("echo", json!({})).await;
        assert!(result.is_error);
        assert!(!result.text_content().contains("circuit open"));
        assert!(result.text_content().contains("timed out"));
    }

    #[tokio::test]
    async fn unknown_worker_dispatch_leaves_no_breaker_state() {
        let supervisor = Supervisor::new();
        for _ in 0..3 {
            let result = supervisor.call_tool_on("ghost", "echo", json!({})).await;
            assert!(result.is_error);
            assert!(result.text_content().contains("not connected"));
        }
        assert_eq!(supervisor.breaker_count(), 0);
    }

    #[tokio::test]
    async fn parallel_convenience_preserves_input_order() {
        let supervisor = Supervisor::new();
        attach(&supervisor, "alpha", echo_worker("alpha")).await;

        let calls = vec![
            ToolCallRequest {
                tool: "echo".into(),
                arguments: json!({"i": 0}),
            },
            ToolCallRequest {
                tool: "missing".into(),
                arguments: json!({}),
            },
            ToolCallRequest {
                tool: "echo".into(),
                arguments: json!({"i": 2}),
            },
        ];
        let results = supervisor.call_tools_parallel(calls).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].text_content().contains("\"i\":0"));
        assert!(results[1].is_error);
        assert!(results[2].text_content().contains("\"i\":2"));
    }

    struct StaticPolicy {
        decision: Result<PolicyDecision, &'static str>,
    }

    #[async_trait]
    impl PolicyCheck for StaticPolicy {
        async fn check(&self, _request: &PolicyRequest) -> Result<PolicyDecision, WorkerError> {
            match &self.decision {
                Ok(decision) => Ok(PolicyDecision {
                    passed: decision.passed,
                    issues: decision.issues.clone(),
                }),
                Err(reason) => Err(WorkerError::PolicyUnreachable {
                    reason: reason.to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn policy_veto_blocks_before_dispatch() {
        let mut supervisor = Supervisor::new();
        supervisor.set_policy(
            Arc::new(StaticPolicy {
                decision: Ok(PolicyDecision {
                    passed: false,
                    issues: vec!["restricted tool".into()],
                }),
            }),
            FailurePosture::FailOpen,
        );
        let calls = attach(&supervisor, "alpha", echo_worker("alpha")).await;

        let result = supervisor.call_tool("echo", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("restricted tool"));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn unreachable_policy_respects_posture() {
        let mut supervisor = Supervisor::new();
        supervisor.set_policy(
            Arc::new(StaticPolicy {
                decision: Err("connection refused"),
            }),
            FailurePosture::FailOpen,
        );
        attach(&supervisor, "alpha", echo_worker("alpha")).await;

        // Fail-open: the call proceeds.
        let result = supervisor.call_tool("echo", json!({})).await;
        assert!(!result.is_error);

        supervisor.set_policy(
            Arc::new(StaticPolicy {
                decision: Err("connection refused"),
            }),
            FailurePosture::FailClosed,
        );
        let result = supervisor.call_tool("echo", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("fail-closed"));
    }

    #[tokio::test]
    async fn stop_workers_clears_all_state() {
        let supervisor = Supervisor::new();
        attach(&supervisor, "alpha", echo_worker("alpha")).await;
        attach(&supervisor, "beta", echo_worker("beta")).await;
        assert_eq!(supervisor.tool_count(), 1); // same tool name, one entry

        supervisor.stop_workers().await;
        assert!(supervisor.worker_names().await.is_empty());
        assert_eq!(supervisor.tool_count(), 0);

        let result = supervisor.call_tool("echo", json!({})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn attach_is_a_noop_for_running_worker() {
        let supervisor = Supervisor::new();
        attach(&supervisor, "alpha", echo_worker("alpha")).await;
        // Second attach under the same name is skipped, not an error.
        supervisor
            .attach_worker("alpha", Arc::new(echo_worker("other")))
            .await
            .expect("noop attach");
        assert_eq!(supervisor.worker_names().await, vec!["alpha"]);
    }
}

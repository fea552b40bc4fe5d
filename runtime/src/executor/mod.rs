//! Concurrency-bounded parallel batch execution
//!
//! Runs a batch of tool calls with a concurrency ceiling, an optional
//! per-worker rate limit, and a per-call timeout. Dispatch order follows
//! priority (higher first, ties in input order) but results always come back
//! in input order. Nothing here aborts a batch: a failed or timed-out call
//! is just one more outcome with `success == false`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::protocol::ToolCallResult;
use crate::supervisor::Supervisor;

/// Per-call timeout when none is configured.
pub const DEFAULT_BATCH_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// One call in a batch.
#[derive(Debug, Clone)]
pub struct BatchCall {
    pub tool: String,
    pub arguments: Value,
    /// Pin the call to one worker, bypassing global tool resolution.
    pub worker: Option<String>,
    /// Higher dispatches earlier when calls queue on the concurrency limit.
    pub priority: i32,
}

impl BatchCall {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            worker: None,
            priority: 0,
        }
    }

    pub fn on_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// What became of one batch call.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub tool: String,
    pub arguments: Value,
    pub result: ToolCallResult,
    pub duration_ms: u64,
    /// `false` for error results and timeouts alike.
    pub success: bool,
}

/// Batch runner. One instance is reusable across batches; limits apply per
/// `execute_batch` call.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    max_concurrent: usize,
    timeout: Duration,
    rate_limit_per_second: Option<f64>,
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelExecutor {
    pub fn new() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            max_concurrent: parallelism,
            timeout: DEFAULT_BATCH_CALL_TIMEOUT,
            rate_limit_per_second: None,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Minimum spacing between dispatches to the same worker, expressed as
    /// calls per second.
    pub fn with_rate_limit(mut self, per_second: f64) -> Self {
        self.rate_limit_per_second = (per_second > 0.0).then_some(per_second);
        self
    }

    /// Run a batch against a supervisor. Unpinned calls are resolved to
    /// their owning worker up front so the rate limiter can key on it.
    pub async fn execute(
        &self,
        supervisor: &Supervisor,
        mut calls: Vec<BatchCall>,
    ) -> Vec<BatchOutcome> {
        for call in &mut calls {
            if call.worker.is_none() {
                call.worker = supervisor.resolve(&call.tool);
            }
        }
        self.execute_batch(calls, |call| async move {
            match &call.worker {
                Some(worker) => {
                    supervisor
                        .call_tool_on(worker, &call.tool, call.arguments)
                        .await
                }
                None => supervisor.call_tool(&call.tool, call.arguments).await,
            }
        })
        .await
    }

    /// Run a batch through an arbitrary handler. The handler sees calls in
    /// priority order, at most `max_concurrent` at a time; the returned
    /// outcomes are in input order.
    pub async fn execute_batch<F, Fut>(&self, calls: Vec<BatchCall>, handler: F) -> Vec<BatchOutcome>
    where
        F: Fn(BatchCall) -> Fut + Sync,
        Fut: std::future::Future<Output = ToolCallResult>,
    {
        if calls.is_empty() {
            return Vec::new();
        }

        let mut order: Vec<usize> = (0..calls.len()).collect();
        // Stable sort: equal priorities keep input order.
        order.sort_by_key(|&i| std::cmp::Reverse(calls[i].priority));

        let semaphore = Semaphore::new(self.max_concurrent);
        let last_dispatch: Mutex<HashMap<String, Instant>> = Mutex::new(HashMap::new());
        let handler = &handler;
        let last_dispatch = &last_dispatch;
        let semaphore = &semaphore;

        let mut indexed = futures_util::future::join_all(order.iter().map(|&index| {
            let call = calls[index].clone();
            async move {
                // Acquire in dispatch order; the semaphore queues fairly.
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                if let Some(per_second) = self.rate_limit_per_second {
                    self.rate_gate(last_dispatch, call.worker.as_deref(), per_second)
                        .await;
                }

                let started = Instant::now();
                let result =
                    match tokio::time::timeout(self.timeout, handler(call.clone())).await {
                        Ok(result) => result,
                        Err(_) => ToolCallResult::error(format!(
                            "call to '{}' timed out after {:?}",
                            call.tool, self.timeout
                        )),
                    };
                let duration_ms = started.elapsed().as_millis() as u64;
                let success = !result.is_error;
                (
                    index,
                    BatchOutcome {
                        tool: call.tool,
                        arguments: call.arguments,
                        result,
                        duration_ms,
                        success,
                    },
                )
            }
        }))
        .await;

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, outcome)| outcome).collect()
    }

    /// Block until this worker's dispatch slot comes around. Calls without a
    /// resolved worker share one slot under the empty key.
    async fn rate_gate(
        &self,
        last_dispatch: &Mutex<HashMap<String, Instant>>,
        worker: Option<&str>,
        per_second: f64,
    ) {
        let interval = Duration::from_secs_f64(1.0 / per_second);
        let key = worker.unwrap_or_default().to_string();
        loop {
            let wait = {
                let mut slots = last_dispatch.lock().expect("rate limiter lock");
                let now = Instant::now();
                match slots.get(&key) {
                    Some(last) if now < *last + interval => *last + interval - now,
                    _ => {
                        slots.insert(key.clone(), now);
                        return;
                    }
                }
            };
            tokio::time::sleep(wait).await;
        }
    }
}

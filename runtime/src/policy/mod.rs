//! Pre-dispatch policy hook
//!
//! The supervisor consults an external check before dispatching a tool call;
//! the check may veto the call. The check itself is an external collaborator
//! and only its boundary is defined here.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkerError;

/// What the supervisor sends the policy endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyRequest {
    pub operation: String,
    pub context: PolicyContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyContext {
    pub tool: String,
    pub args: Value,
}

/// What the policy endpoint answers with.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyDecision {
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// What happens when the policy check itself cannot be reached.
///
/// Fail-open (the default, matching the systems this runtime hosts) lets the
/// call proceed; stricter deployments configure fail-closed. A timeout and a
/// non-success status are both "unreachable".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePosture {
    FailOpen,
    FailClosed,
}

impl Default for FailurePosture {
    fn default() -> Self {
        FailurePosture::FailOpen
    }
}

/// The boundary the supervisor calls before dispatch.
#[async_trait]
pub trait PolicyCheck: Send + Sync {
    async fn check(&self, request: &PolicyRequest) -> Result<PolicyDecision, WorkerError>;
}

/// Policy check backed by an HTTP endpoint.
pub struct HttpPolicyCheck {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpPolicyCheck {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PolicyCheck for HttpPolicyCheck {
    async fn check(&self, request: &PolicyRequest) -> Result<PolicyDecision, WorkerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| WorkerError::PolicyUnreachable {
                reason: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| WorkerError::PolicyUnreachable {
                reason: e.to_string(),
            })?;

        response
            .json::<PolicyDecision>()
            .await
            .map_err(|e| WorkerError::PolicyUnreachable {
                reason: format!("malformed policy response: {e}"),
            })
    }
}

//! Configuration
//!
//! Two files, two concerns. `.toolbus.json` is the worker roster: which
//! subprocesses to launch and how, discovered by walking up from the current
//! directory (closest file wins) with a fallback to the user config
//! directory. `toolbus.toml` holds runtime tuning: timeouts, retry, breaker,
//! executor, and policy settings; every section and field is optional and
//! falls back to the built-in defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::WorkerError;
use crate::executor::ParallelExecutor;
use crate::policy::FailurePosture;
use crate::recovery::{BreakerSettings, RetryPolicy};
use crate::supervisor::WorkerConfig;

pub const WORKERS_FILE: &str = ".toolbus.json";
pub const RUNTIME_FILE: &str = "toolbus.toml";

// ----------------------------------------------------------------------
// Worker roster
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkersConfig {
    #[serde(default)]
    pub workers: HashMap<String, WorkerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl WorkersConfig {
    /// Load the roster from the nearest `.toolbus.json`. No file anywhere is
    /// not an error; it just means an empty roster.
    pub fn load() -> Result<Self, WorkerError> {
        match find_config_file(WORKERS_FILE) {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, WorkerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| WorkerError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        serde_json::from_str(&raw).map_err(|e| WorkerError::Config {
            reason: format!("invalid {}: {e}", path.display()),
        })
    }

    /// Launch descriptions, sorted by name for deterministic registration
    /// order.
    pub fn worker_configs(&self) -> Vec<WorkerConfig> {
        let mut configs: Vec<WorkerConfig> = self
            .workers
            .iter()
            .map(|(name, entry)| WorkerConfig {
                name: name.clone(),
                command: entry.command.clone(),
                args: entry.args.clone(),
                env: entry.env.clone(),
            })
            .collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }
}

/// Walk up from the current directory looking for `name`; fall back to the
/// user config directory (`~/.config/toolbus/` on Linux).
pub fn find_config_file(name: &str) -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }
    let fallback = dirs::config_dir()?.join("toolbus").join(name);
    fallback.is_file().then_some(fallback)
}

// ----------------------------------------------------------------------
// Runtime tuning
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub timeouts: TimeoutsConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub executor: ExecutorConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub connect_secs: u64,
    pub call_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            call_secs: 300,
            shutdown_grace_secs: 5,
        }
    }
}

impl TimeoutsConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn call(&self) -> Duration {
        Duration::from_secs(self.call_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub window_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 60,
            cooldown_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Defaults to the number of available cores when unset.
    pub max_concurrent: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub rate_limit_per_second: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// No endpoint means no policy check at all.
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub posture: FailurePosture,
}

impl PolicyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(5))
    }
}

impl RuntimeConfig {
    /// Load runtime tuning from the nearest `toolbus.toml`, or defaults when
    /// no file exists.
    pub fn load() -> Result<Self, WorkerError> {
        match find_config_file(RUNTIME_FILE) {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, WorkerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| WorkerError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        toml::from_str(&raw).map_err(|e| WorkerError::Config {
            reason: format!("invalid {}: {e}", path.display()),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            backoff_factor: self.retry.backoff_factor,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.breaker.failure_threshold,
            window: Duration::from_secs(self.breaker.window_secs),
            cooldown: Duration::from_secs(self.breaker.cooldown_secs),
        }
    }

    pub fn executor(&self) -> ParallelExecutor {
        let mut executor = ParallelExecutor::new();
        if let Some(max) = self.executor.max_concurrent {
            executor = executor.with_max_concurrent(max);
        }
        if let Some(secs) = self.executor.timeout_secs {
            executor = executor.with_timeout(Duration::from_secs(secs));
        }
        if let Some(rate) = self.executor.rate_limit_per_second {
            executor = executor.with_rate_limit(rate);
        }
        executor
    }
}

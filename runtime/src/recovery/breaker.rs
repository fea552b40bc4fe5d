//! Per-worker circuit breaker
//!
//! Closed: calls pass through and failures are counted within a trailing
//! window. Open: calls are rejected immediately without touching the worker.
//! HalfOpen: after the cooldown, one probe call at a time is allowed through;
//! its outcome decides whether the circuit closes or reopens. A probe whose
//! caller goes away without reporting an outcome is replaced after another
//! cooldown, so an abandoned probe cannot wedge the circuit.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Failures within `window` that trip the circuit.
    pub failure_threshold: u32,
    /// Trailing window over which failures are counted.
    pub window: Duration,
    /// How long the circuit stays open before allowing a probe.
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// When the in-flight probe was admitted; cleared once it reports.
    probe_started: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            probe_started: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Admission check. Returns `false` when the call must be rejected
    /// without being dispatched. Transitions Open -> HalfOpen once the
    /// cooldown has elapsed; the caller that gets `true` in that moment is
    /// the single probe.
    pub fn allow(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .map(|t| t.elapsed() >= self.settings.cooldown)
                    .unwrap_or(true);
                if cooled {
                    self.state = CircuitState::HalfOpen;
                    self.probe_started = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
            // A probe is in flight; everyone else fails fast. If the probe's
            // caller was cancelled before reporting, admit a replacement
            // after another cooldown.
            CircuitState::HalfOpen => {
                let abandoned = self
                    .probe_started
                    .map(|t| t.elapsed() >= self.settings.cooldown)
                    .unwrap_or(true);
                if abandoned {
                    self.probe_started = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.failures.clear();
        self.opened_at = None;
        self.probe_started = None;
        if self.state != CircuitState::Closed {
            tracing::info!("circuit closed");
        }
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self) {
        let now = Instant::now();
        match self.state {
            CircuitState::HalfOpen => {
                // Probe failed: reopen and restart the cooldown.
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
                self.probe_started = None;
                self.failures.clear();
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                self.failures.push_back(now);
                while let Some(front) = self.failures.front() {
                    if now.duration_since(*front) > self.settings.window {
                        self.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if self.failures.len() as u32 >= self.settings.failure_threshold {
                    tracing::warn!(
                        failures = self.failures.len(),
                        "failure threshold exceeded, opening circuit"
                    );
                    self.state = CircuitState::Open;
                    self.opened_at = Some(now);
                    self.failures.clear();
                }
            }
        }
    }
}

//! Failure recovery: retry with backoff and per-worker circuit breaking
//!
//! Every supervisor-routed call passes through both pieces. Retry smooths
//! over single transient blips; the breaker converts a crash-looping or
//! partitioned worker into fast, cheap rejections instead of a pile of
//! queued timeouts.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerSettings, CircuitBreaker, CircuitState};
pub use retry::RetryPolicy;

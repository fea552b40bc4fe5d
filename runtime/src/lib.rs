//! Tool-invocation runtime for worker subprocesses.
//!
//! Workers speak newline-delimited JSON-RPC over stdio (or an HTTP stream);
//! the [`supervisor::Supervisor`] launches them, merges their tool catalogs,
//! and routes calls through policy checks, retry, and per-worker circuit
//! breaking. The [`executor::ParallelExecutor`] runs batches of calls with
//! concurrency bounds and rate limits.

pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod policy;
pub mod protocol;
pub mod recovery;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

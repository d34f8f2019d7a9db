//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Configuration for the download orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of concurrent downloads (worker slots).
    /// Adjustable at runtime; lowering it never interrupts transfers
    /// that are already running.
    #[serde(default = "default_worker_capacity")]
    pub worker_capacity: usize,

    /// How often each worker polls its transfer for progress (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long to wait for the transfer client to acknowledge an abort
    /// before force-marking the job (milliseconds).
    #[serde(default = "default_abort_ack_timeout")]
    pub abort_ack_timeout_ms: u64,

    /// Bounded wait for in-flight transfers to wind down on shutdown
    /// (milliseconds). Jobs still running after this are recovered back
    /// to the queue on the next start.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    /// Retry and backoff policy for failed jobs.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_worker_capacity() -> usize {
    3
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

fn default_abort_ack_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_shutdown_timeout() -> u64 {
    15_000 // 15 seconds
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_capacity: default_worker_capacity(),
            poll_interval_ms: default_poll_interval(),
            abort_ack_timeout_ms: default_abort_ack_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

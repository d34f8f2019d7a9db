//! Download orchestrator.
//!
//! A single control loop owns all job state changes: it dispatches
//! queued jobs to a bounded worker pool in priority order, applies user
//! commands, schedules retries with exponential backoff and publishes
//! every change as an event. Workers run one transfer each and report
//! back over a channel.

mod config;
mod handle;
mod pool;
mod runner;
mod scheduler;
mod types;

pub use config::OrchestratorConfig;
pub use handle::OrchestratorHandle;
pub use runner::Orchestrator;
pub use scheduler::plan_dispatch;
pub use types::{BatchOp, BatchResult, OrchestratorError, OrchestratorStatus};

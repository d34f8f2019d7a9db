//! Types for the download orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::job::{DownloadJob, JobError, JobStatus, Priority, TrackRef};
use crate::transfer::TransferError;

use super::config::OrchestratorConfig;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The requested operation conflicts with the job's current state.
    #[error("conflict on job {job_id}: cannot {operation} while {status}")]
    Conflict {
        job_id: String,
        status: JobStatus,
        operation: String,
    },

    /// The track reference could not be resolved by the transfer client.
    #[error("invalid track reference: {0}")]
    InvalidReference(String),

    /// Transfer client error outside of a job's own retry handling.
    #[error("transfer client error: {0}")]
    Transfer(String),

    /// Job store error.
    #[error("job store error: {0}")]
    Store(String),

    /// The orchestrator's control loop is not running.
    #[error("orchestrator is not running")]
    NotRunning,
}

impl From<JobError> for OrchestratorError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => OrchestratorError::JobNotFound(id),
            JobError::InvalidTransition { job_id, from, to } => OrchestratorError::Conflict {
                job_id,
                status: from,
                operation: format!("move to {}", to),
            },
            JobError::InvalidState {
                job_id,
                current,
                operation,
            } => OrchestratorError::Conflict {
                job_id,
                status: current,
                operation,
            },
            JobError::Database(msg) => OrchestratorError::Store(msg),
        }
    }
}

impl From<TransferError> for OrchestratorError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::InvalidReference(msg) => OrchestratorError::InvalidReference(msg),
            other => OrchestratorError::Transfer(other.to_string()),
        }
    }
}

/// Operation applied to every job in a batch command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatchOp {
    Pause,
    Resume,
    Cancel,
    Retry,
    SetPriority(Priority),
}

impl BatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOp::Pause => "pause",
            BatchOp::Resume => "resume",
            BatchOp::Cancel => "cancel",
            BatchOp::Retry => "retry",
            BatchOp::SetPriority(_) => "set_priority",
        }
    }
}

/// Per-job outcome of a batch command. Failures never stop the batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub job_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    pub fn success(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ok: true,
            error: None,
        }
    }

    pub fn failure(job_id: impl Into<String>, err: &OrchestratorError) -> Self {
        Self {
            job_id: job_id.into(),
            ok: false,
            error: Some(err.to_string()),
        }
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the control loop is running.
    pub running: bool,
    /// Current worker slot capacity.
    pub capacity: usize,
    /// Workers with an in-flight transfer.
    pub active_workers: usize,
    /// Jobs waiting for a slot.
    pub queued_count: usize,
    /// Jobs currently downloading.
    pub downloading_count: usize,
    /// Jobs paused by the user.
    pub paused_count: usize,
    /// Failed jobs, including those waiting out a backoff delay.
    pub failed_count: usize,
    /// Failed jobs with a retry already scheduled.
    pub scheduled_retries: usize,
}

/// Commands accepted by the control loop.
pub(crate) enum Command {
    Submit {
        track_ref: TrackRef,
        priority: Priority,
        reply: oneshot::Sender<Result<DownloadJob, OrchestratorError>>,
    },
    Pause {
        job_id: String,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Resume {
        job_id: String,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Cancel {
        job_id: String,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Retry {
        job_id: String,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    SetPriority {
        job_id: String,
        priority: Priority,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Batch {
        op: BatchOp,
        job_ids: Vec<String>,
        reply: oneshot::Sender<Vec<BatchResult>>,
    },
    SetCapacity {
        capacity: usize,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    ReloadConfig {
        config: OrchestratorConfig,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Status {
        reply: oneshot::Sender<OrchestratorStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Events reported back to the control loop by worker tasks.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Progress {
        worker_id: crate::job::WorkerId,
        job_id: String,
        progress_bytes: u64,
        total_bytes: u64,
    },
    Finished {
        worker_id: crate::job::WorkerId,
        job_id: String,
        outcome: WorkerOutcome,
    },
}

/// Final result of a single transfer attempt.
#[derive(Debug)]
pub(crate) enum WorkerOutcome {
    /// Transfer finished successfully.
    Completed { bytes: u64, total: u64 },
    /// Transfer failed. `transient` decides retry eligibility.
    Failed { message: String, transient: bool },
    /// Transfer stopped after an abort request was acknowledged.
    Aborted,
}

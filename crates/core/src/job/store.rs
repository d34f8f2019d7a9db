//! Job storage trait and query types.

use thiserror::Error;

use crate::job::{DownloadJob, JobStatus, Priority, TrackRef, WorkerId};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The requested state transition is not legal.
    #[error("Cannot move job {job_id} from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Cannot perform the operation in the job's current status.
    #[error("Cannot {operation} job {job_id}: current status is {current}")]
    InvalidState {
        job_id: String,
        current: JobStatus,
        operation: String,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    /// Opaque transfer reference.
    pub track_ref: TrackRef,
    /// Initial scheduling priority.
    pub priority: Priority,
}

/// Sort key for job listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    Priority,
}

/// Sort direction for job listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    /// Filter by status.
    pub status: Option<JobStatus>,
    /// Filter by priority.
    pub priority: Option<Priority>,
    /// Sort key.
    pub sort: JobSort,
    /// Sort direction.
    pub order: SortOrder,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            priority: None,
            sort: JobSort::CreatedAt,
            order: SortOrder::Asc,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the sort key and direction.
    pub fn sorted_by(mut self, sort: JobSort, order: SortOrder) -> Self {
        self.sort = sort;
        self.order = order;
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for job storage backends.
///
/// All writes to a given job go through the orchestrator's control loop,
/// so implementations only need interior mutability, not cross-writer
/// conflict resolution.
pub trait JobStore: Send + Sync {
    /// Create a new job in `Queued` status.
    fn create(&self, request: CreateJobRequest) -> Result<DownloadJob, JobError>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<DownloadJob>, JobError>;

    /// List jobs matching the filter.
    fn list(&self, filter: &JobFilter) -> Result<Vec<DownloadJob>, JobError>;

    /// Count jobs matching the filter.
    fn count(&self, filter: &JobFilter) -> Result<i64, JobError>;

    /// Apply a state transition, validating it against the state machine.
    ///
    /// `error` populates `last_error` (used when moving to `Failed`).
    /// Entering `Downloading` clears `last_error`; leaving `Downloading`
    /// clears `assigned_worker`.
    fn transition(
        &self,
        id: &str,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<DownloadJob, JobError>;

    /// Set or clear the worker owning the job.
    fn set_assigned_worker(
        &self,
        id: &str,
        worker: Option<WorkerId>,
    ) -> Result<DownloadJob, JobError>;

    /// Change the job's priority. Rejected once the job is terminal.
    fn set_priority(&self, id: &str, priority: Priority) -> Result<DownloadJob, JobError>;

    /// Record transfer progress. Regressions within an attempt are ignored
    /// so `progress_bytes` stays monotonic while `Downloading`.
    fn update_progress(
        &self,
        id: &str,
        progress_bytes: u64,
        total_bytes: u64,
    ) -> Result<DownloadJob, JobError>;

    /// Reset progress to zero (fresh attempt, or pause without resume support).
    fn reset_progress(&self, id: &str) -> Result<DownloadJob, JobError>;

    /// Increment the attempt counter.
    fn increment_retry_count(&self, id: &str) -> Result<DownloadJob, JobError>;

    /// Record a manual retry: moves the retry floor up to the current
    /// count so the automatic budget starts over, without touching the
    /// historical count.
    fn mark_manual_retry(&self, id: &str) -> Result<DownloadJob, JobError>;

    /// Permanently delete a job. Returns the deleted job if found.
    fn delete(&self, id: &str) -> Result<DownloadJob, JobError>;

    /// Return every `Downloading` job to `Queued` and clear its worker.
    ///
    /// Used once at startup: jobs left in `Downloading` by a previous
    /// process have no live transfer attached anymore, so they go back
    /// into the queue for a fresh dispatch. Returns the recovered jobs.
    fn recover_in_flight(&self) -> Result<Vec<DownloadJob>, JobError>;
}

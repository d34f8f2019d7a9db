//! Core download job data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a worker pool slot currently driving a transfer.
pub type WorkerId = u64;

/// Opaque reference to the thing being downloaded.
///
/// Owned by an upstream collaborator; the core never interprets its
/// contents beyond handing it to the transfer client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TrackRef(String);

impl TrackRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. `P0` is dispatched before `P1`, `P1` before `P2`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    P0,
    P1,
    P2,
}

impl Priority {
    /// Numeric rank used for ordering and storage (0 = most urgent).
    pub fn rank(&self) -> u8 {
        match self {
            Priority::P0 => 0,
            Priority::P1 => 1,
            Priority::P2 => 2,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(Priority::P0),
            1 => Some(Priority::P1),
            2 => Some(Priority::P2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P0 => "p0",
            Priority::P1 => "p1",
            Priority::P2 => "p2",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // P0 sorts first
        self.rank().cmp(&other.rank())
    }
}

/// Current status of a download job.
///
/// State machine flow:
/// ```text
/// Queued -> Downloading -> Completed
///    |          |    \
///    |          v     v
///    |       Paused  Failed -> Queued (retry)
///    |          |
///    |          v
///    +------> Queued (resume)
///
/// Queued/Paused/Downloading/Failed can transition to Cancelled at any point.
/// Completed and Cancelled are terminal.
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a free worker slot.
    Queued,
    /// A worker owns the transfer.
    Downloading,
    /// Held back by user command; re-enters the queue on resume.
    Paused,
    /// Transfer finished successfully (terminal).
    Completed,
    /// Transfer failed; re-enters the queue only through a retry decision.
    Failed,
    /// Cancelled by user command (terminal).
    Cancelled,
}

impl JobStatus {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Returns true if a worker currently owns the job.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Downloading)
    }

    /// Returns true if the job can be cancelled from this status.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if the state machine permits moving to `to`.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Queued, Downloading)
                | (Queued, Cancelled)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Downloading, Paused)
                | (Downloading, Cancelled)
                | (Paused, Queued)
                | (Paused, Cancelled)
                | (Failed, Queued)
                | (Failed, Cancelled)
        )
    }

    /// Returns the status as a string (for filtering and storage).
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "downloading" => Some(JobStatus::Downloading),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A download job: one queued or executing transfer request for a single track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadJob {
    /// Unique identifier (UUID), immutable.
    pub id: String,

    /// Opaque reference handed to the transfer client.
    pub track_ref: TrackRef,

    /// Scheduling priority, mutable by user command.
    pub priority: Priority,

    /// Current status.
    pub status: JobStatus,

    /// Bytes transferred in the current attempt.
    pub progress_bytes: u64,

    /// Total size of the transfer, 0 until the client reports it.
    pub total_bytes: u64,

    /// Number of attempts so far. Never decreases.
    pub retry_count: u32,

    /// Value of `retry_count` at the last manual retry; the automatic
    /// retry budget is measured against this floor.
    pub retry_floor: u32,

    /// Last failure reason, cleared on a successful (re)start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Worker currently owning the transfer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<WorkerId>,

    /// When the job was submitted.
    pub created_at: DateTime<Utc>,

    /// Changes on every state transition.
    pub updated_at: DateTime<Utc>,
}

impl DownloadJob {
    /// Attempts consumed since the last manual retry.
    pub fn attempts_since_retry(&self) -> u32 {
        self.retry_count.saturating_sub(self.retry_floor)
    }
}

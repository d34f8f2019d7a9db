//! Types for transfer client operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::TrackRef;

/// Errors that can occur during transfer client operations.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Invalid transfer reference: {0}")]
    InvalidReference(String),

    #[error("Peer rejected the transfer: {0}")]
    Rejected(String),

    #[error("API error: {0}")]
    Api(String),
}

impl TransferError {
    /// Returns true if a fresh attempt could plausibly succeed.
    ///
    /// Transient errors are eligible for automatic retry; permanent ones
    /// park the job in `Failed` until a manual retry.
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::ConnectionFailed(_)
            | TransferError::Timeout
            | TransferError::PeerUnavailable(_)
            | TransferError::TransferNotFound(_)
            | TransferError::Api(_) => true,
            TransferError::InvalidReference(_) | TransferError::Rejected(_) => false,
        }
    }
}

/// Identifies one in-flight transfer at the download client.
///
/// Only the client that issued the handle interprets its parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferHandle {
    /// Remote peer the file is fetched from.
    pub remote_user: String,
    /// Client-side transfer identifier.
    pub transfer_id: String,
}

impl std::fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.remote_user, self.transfer_id)
    }
}

/// State of a transfer as reported by the download client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Accepted by the client but not yet queued at the peer.
    Requested,
    /// Waiting in the peer's upload queue.
    Queued,
    /// Handshaking with the peer.
    Initializing,
    /// Bytes are flowing.
    InProgress,
    /// Finished successfully (terminal).
    Succeeded,
    /// Aborted on our request (terminal).
    Cancelled,
    /// Peer or network error (terminal).
    Errored,
    /// Peer rejected the request (terminal).
    Rejected,
    /// Peer stopped responding (terminal).
    TimedOut,
}

impl TransferState {
    /// Returns true if the transfer will make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Succeeded
                | TransferState::Cancelled
                | TransferState::Errored
                | TransferState::Rejected
                | TransferState::TimedOut
        )
    }

    /// Returns the string representation for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Requested => "requested",
            TransferState::Queued => "queued",
            TransferState::Initializing => "initializing",
            TransferState::InProgress => "in_progress",
            TransferState::Succeeded => "succeeded",
            TransferState::Cancelled => "cancelled",
            TransferState::Errored => "errored",
            TransferState::Rejected => "rejected",
            TransferState::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of a transfer, returned by polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSnapshot {
    /// Current state at the client.
    pub state: TransferState,
    /// Bytes received so far.
    pub bytes_transferred: u64,
    /// Total size of the file, 0 if not yet known.
    pub size_bytes: u64,
    /// Failure detail when the state is terminal and unsuccessful.
    pub error: Option<String>,
}

/// Trait for transfer client backends.
///
/// The orchestrator only talks to the download client through this
/// boundary: resolve a reference ahead of dispatch, start a transfer,
/// poll it, cancel it.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Validate that `track_ref` can be turned into a transfer.
    ///
    /// Called at submission time so an unusable reference fails the
    /// `submit` call instead of surfacing later as a dispatch failure.
    async fn resolve(&self, track_ref: &TrackRef) -> Result<(), TransferError>;

    /// Start a transfer for `track_ref`.
    ///
    /// `resume_from` is a hint in bytes; clients without resume support
    /// ignore it and start from zero.
    async fn start_transfer(
        &self,
        track_ref: &TrackRef,
        resume_from: u64,
    ) -> Result<TransferHandle, TransferError>;

    /// Poll the current state of a transfer.
    async fn poll_transfer(
        &self,
        handle: &TransferHandle,
    ) -> Result<TransferSnapshot, TransferError>;

    /// Ask the client to abort a transfer.
    ///
    /// Returning `Ok` acknowledges the abort; the transfer may still
    /// report a terminal state on a later poll.
    async fn cancel_transfer(&self, handle: &TransferHandle) -> Result<(), TransferError>;

    /// Whether interrupted transfers can continue from a byte offset.
    fn supports_resume(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransferError::Timeout.is_transient());
        assert!(TransferError::ConnectionFailed("refused".into()).is_transient());
        assert!(TransferError::PeerUnavailable("offline".into()).is_transient());
        assert!(TransferError::Api("500".into()).is_transient());
        assert!(!TransferError::InvalidReference("garbage".into()).is_transient());
        assert!(!TransferError::Rejected("banned".into()).is_transient());
    }

    #[test]
    fn test_transfer_state_terminality() {
        assert!(!TransferState::Requested.is_terminal());
        assert!(!TransferState::Queued.is_terminal());
        assert!(!TransferState::InProgress.is_terminal());
        assert!(TransferState::Succeeded.is_terminal());
        assert!(TransferState::Cancelled.is_terminal());
        assert!(TransferState::Errored.is_terminal());
        assert!(TransferState::Rejected.is_terminal());
        assert!(TransferState::TimedOut.is_terminal());
    }

    #[test]
    fn test_transfer_state_serialization() {
        assert_eq!(
            serde_json::to_string(&TransferState::InProgress).unwrap(),
            "\"in_progress\""
        );
        let back: TransferState = serde_json::from_str("\"timed_out\"").unwrap();
        assert_eq!(back, TransferState::TimedOut);
    }

    #[test]
    fn test_transfer_handle_display() {
        let handle = TransferHandle {
            remote_user: "peer".to_string(),
            transfer_id: "t-1".to_string(),
        };
        assert_eq!(handle.to_string(), "peer/t-1");
    }
}

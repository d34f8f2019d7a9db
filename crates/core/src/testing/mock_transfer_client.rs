//! Mock transfer client for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::job::TrackRef;
use crate::transfer::{
    TransferClient, TransferError, TransferHandle, TransferSnapshot, TransferState,
};

/// A recorded start_transfer call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedStart {
    /// Reference the transfer was started for.
    pub track_ref: TrackRef,
    /// Requested resume offset.
    pub resume_from: u64,
    /// When the request was made.
    pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct MockTransfer {
    track_ref: String,
    snapshot: TransferSnapshot,
}

/// Mock implementation of the TransferClient trait.
///
/// Provides controllable behavior for testing:
/// - Record started and cancelled transfers for assertions
/// - Drive transfer state and progress from the test
/// - Simulate resolve/start failures per reference
/// - Simulate a client that never acknowledges cancels
#[derive(Debug)]
pub struct MockTransferClient {
    /// Recorded start_transfer calls.
    started: Arc<RwLock<Vec<RecordedStart>>>,
    /// References whose transfer was cancelled.
    cancelled: Arc<RwLock<Vec<String>>>,
    /// Live transfers by transfer id.
    transfers: Arc<RwLock<HashMap<String, MockTransfer>>>,
    /// References that fail to resolve.
    resolve_errors: Arc<RwLock<HashMap<String, TransferError>>>,
    /// References whose next start fails (consumed on use).
    start_errors: Arc<RwLock<HashMap<String, TransferError>>>,
    /// Start transfers already succeeded, for tests that only care
    /// about completion.
    auto_complete: AtomicBool,
    /// When set, cancel_transfer never returns.
    hang_on_cancel: AtomicBool,
    /// Whether the mock advertises resume support.
    resume_support: AtomicBool,
    /// Counter for generating transfer ids.
    id_counter: AtomicU32,
    /// Default size for new transfers.
    default_size: u64,
}

impl Default for MockTransferClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransferClient {
    pub fn new() -> Self {
        Self {
            started: Arc::new(RwLock::new(Vec::new())),
            cancelled: Arc::new(RwLock::new(Vec::new())),
            transfers: Arc::new(RwLock::new(HashMap::new())),
            resolve_errors: Arc::new(RwLock::new(HashMap::new())),
            start_errors: Arc::new(RwLock::new(HashMap::new())),
            auto_complete: AtomicBool::new(false),
            hang_on_cancel: AtomicBool::new(false),
            resume_support: AtomicBool::new(false),
            id_counter: AtomicU32::new(0),
            default_size: 10 * 1024 * 1024, // 10 MB
        }
    }

    /// All recorded start_transfer calls.
    pub async fn started_transfers(&self) -> Vec<RecordedStart> {
        self.started.read().await.clone()
    }

    /// References whose transfers were cancelled.
    pub async fn cancelled_refs(&self) -> Vec<String> {
        self.cancelled.read().await.clone()
    }

    /// Make a reference fail to resolve.
    pub async fn set_resolve_error(&self, track_ref: &str, error: TransferError) {
        self.resolve_errors
            .write()
            .await
            .insert(track_ref.to_string(), error);
    }

    /// Make the next start for a reference fail.
    pub async fn set_start_error(&self, track_ref: &str, error: TransferError) {
        self.start_errors
            .write()
            .await
            .insert(track_ref.to_string(), error);
    }

    /// When enabled, new transfers begin already succeeded.
    pub fn set_auto_complete(&self, enabled: bool) {
        self.auto_complete.store(enabled, Ordering::SeqCst);
    }

    /// When enabled, cancel_transfer blocks forever.
    pub fn set_hang_on_cancel(&self, enabled: bool) {
        self.hang_on_cancel.store(enabled, Ordering::SeqCst);
    }

    /// Advertise (or drop) resume support.
    pub fn set_resume_support(&self, enabled: bool) {
        self.resume_support.store(enabled, Ordering::SeqCst);
    }

    /// Set progress on the live transfer for a reference.
    pub async fn set_progress(&self, track_ref: &str, bytes: u64, total: u64) {
        self.update_by_ref(track_ref, |s| {
            s.state = TransferState::InProgress;
            s.bytes_transferred = bytes;
            s.size_bytes = total;
        })
        .await;
    }

    /// Mark the live transfer for a reference as succeeded.
    pub async fn complete_transfer(&self, track_ref: &str) {
        self.update_by_ref(track_ref, |s| {
            s.state = TransferState::Succeeded;
            s.bytes_transferred = s.size_bytes;
        })
        .await;
    }

    /// Mark the live transfer for a reference as errored.
    pub async fn fail_transfer(&self, track_ref: &str, message: &str) {
        let message = message.to_string();
        self.update_by_ref(track_ref, move |s| {
            s.state = TransferState::Errored;
            s.error = Some(message);
        })
        .await;
    }

    /// Mark the live transfer for a reference as rejected by the peer.
    pub async fn reject_transfer(&self, track_ref: &str, message: &str) {
        let message = message.to_string();
        self.update_by_ref(track_ref, move |s| {
            s.state = TransferState::Rejected;
            s.error = Some(message);
        })
        .await;
    }

    /// Number of transfers the client currently tracks.
    pub async fn transfer_count(&self) -> usize {
        self.transfers.read().await.len()
    }

    async fn update_by_ref(&self, track_ref: &str, update: impl FnOnce(&mut TransferSnapshot)) {
        let mut transfers = self.transfers.write().await;
        // Most recent transfer for the reference wins.
        let latest = transfers
            .iter_mut()
            .filter(|(_, t)| t.track_ref == track_ref)
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        if let Some((_, transfer)) = latest {
            update(&mut transfer.snapshot);
        }
    }
}

#[async_trait]
impl TransferClient for MockTransferClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(&self, track_ref: &TrackRef) -> Result<(), TransferError> {
        if let Some(err) = self.resolve_errors.read().await.get(track_ref.as_str()) {
            return Err(err.clone());
        }
        Ok(())
    }

    async fn start_transfer(
        &self,
        track_ref: &TrackRef,
        resume_from: u64,
    ) -> Result<TransferHandle, TransferError> {
        self.started.write().await.push(RecordedStart {
            track_ref: track_ref.clone(),
            resume_from,
            timestamp: Utc::now(),
        });

        if let Some(err) = self.start_errors.write().await.remove(track_ref.as_str()) {
            return Err(err);
        }

        let id = self.id_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let transfer_id = format!("t-{:04}", id);

        let snapshot = if self.auto_complete.load(Ordering::SeqCst) {
            TransferSnapshot {
                state: TransferState::Succeeded,
                bytes_transferred: self.default_size,
                size_bytes: self.default_size,
                error: None,
            }
        } else {
            TransferSnapshot {
                state: TransferState::InProgress,
                bytes_transferred: resume_from,
                size_bytes: self.default_size,
                error: None,
            }
        };

        self.transfers.write().await.insert(
            transfer_id.clone(),
            MockTransfer {
                track_ref: track_ref.as_str().to_string(),
                snapshot,
            },
        );

        Ok(TransferHandle {
            remote_user: "mock".to_string(),
            transfer_id,
        })
    }

    async fn poll_transfer(
        &self,
        handle: &TransferHandle,
    ) -> Result<TransferSnapshot, TransferError> {
        self.transfers
            .read()
            .await
            .get(&handle.transfer_id)
            .map(|t| t.snapshot.clone())
            .ok_or_else(|| TransferError::TransferNotFound(handle.transfer_id.clone()))
    }

    async fn cancel_transfer(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        if self.hang_on_cancel.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }

        let mut transfers = self.transfers.write().await;
        match transfers.get_mut(&handle.transfer_id) {
            Some(transfer) => {
                transfer.snapshot.state = TransferState::Cancelled;
                self.cancelled.write().await.push(transfer.track_ref.clone());
                Ok(())
            }
            None => Err(TransferError::TransferNotFound(handle.transfer_id.clone())),
        }
    }

    fn supports_resume(&self) -> bool {
        self.resume_support.load(Ordering::SeqCst)
    }
}

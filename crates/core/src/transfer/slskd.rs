//! slskd transfer client implementation.
//!
//! Talks to a slskd daemon over its HTTP API. A `TrackRef` for this
//! backend is a JSON document naming the peer, the remote path and the
//! expected size; upstream collaborators produce it from search results.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SlskdConfig;
use crate::job::TrackRef;

use super::{TransferClient, TransferError, TransferHandle, TransferSnapshot, TransferState};

/// slskd client implementation.
pub struct SlskdClient {
    client: Client,
    config: SlskdConfig,
}

/// What a slskd track reference carries on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlskdTrackRef {
    username: String,
    filename: String,
    #[serde(default)]
    size: u64,
}

impl SlskdClient {
    /// Create a new slskd client.
    pub fn new(config: SlskdConfig) -> Result<Self, TransferError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| TransferError::Api(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn parse_ref(track_ref: &TrackRef) -> Result<SlskdTrackRef, TransferError> {
        serde_json::from_str(track_ref.as_str())
            .map_err(|e| TransferError::InvalidReference(e.to_string()))
    }

    fn map_request_error(e: reqwest::Error) -> TransferError {
        if e.is_timeout() {
            TransferError::Timeout
        } else if e.is_connect() {
            TransferError::ConnectionFailed(e.to_string())
        } else {
            TransferError::Api(e.to_string())
        }
    }

    fn downloads_url(&self, username: &str) -> String {
        format!(
            "{}/api/v0/transfers/downloads/{}",
            self.base_url(),
            urlencoding::encode(username)
        )
    }

    /// List the download entries slskd tracks for a peer.
    async fn list_downloads(&self, username: &str) -> Result<Vec<SlskdTransfer>, TransferError> {
        let response = self
            .client
            .get(self.downloads_url(username))
            .header("X-API-Key", &self.config.api_key)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(TransferError::Api(format!("HTTP {}", status)));
        }

        let user: SlskdUserDownloads = response
            .json()
            .await
            .map_err(|e| TransferError::Api(e.to_string()))?;

        Ok(user
            .directories
            .into_iter()
            .flat_map(|d| d.files)
            .collect())
    }
}

/// slskd download entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlskdTransfer {
    id: String,
    filename: String,
    state: String,
    #[serde(default)]
    bytes_transferred: u64,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    exception: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlskdUserDownloads {
    #[serde(default)]
    directories: Vec<SlskdDirectory>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlskdDirectory {
    #[serde(default)]
    files: Vec<SlskdTransfer>,
}

/// Parse a slskd transfer state string.
///
/// Terminal states arrive as "Completed, Succeeded" style compounds.
fn parse_slskd_state(state: &str) -> TransferState {
    if state.contains("Succeeded") {
        TransferState::Succeeded
    } else if state.contains("Cancelled") {
        TransferState::Cancelled
    } else if state.contains("TimedOut") {
        TransferState::TimedOut
    } else if state.contains("Rejected") {
        TransferState::Rejected
    } else if state.contains("Errored") || state.contains("Aborted") {
        TransferState::Errored
    } else if state.contains("InProgress") {
        TransferState::InProgress
    } else if state.contains("Initializing") {
        TransferState::Initializing
    } else if state.contains("Queued") {
        TransferState::Queued
    } else {
        TransferState::Requested
    }
}

impl SlskdTransfer {
    fn into_snapshot(self) -> TransferSnapshot {
        let state = parse_slskd_state(&self.state);
        let error = if state.is_terminal() && state != TransferState::Succeeded {
            Some(self.exception.unwrap_or_else(|| self.state.clone()))
        } else {
            None
        };
        TransferSnapshot {
            state,
            bytes_transferred: self.bytes_transferred,
            size_bytes: self.size,
            error,
        }
    }
}

#[async_trait]
impl TransferClient for SlskdClient {
    fn name(&self) -> &str {
        "slskd"
    }

    async fn resolve(&self, track_ref: &TrackRef) -> Result<(), TransferError> {
        let parsed = Self::parse_ref(track_ref)?;
        if parsed.username.is_empty() || parsed.filename.is_empty() {
            return Err(TransferError::InvalidReference(
                "username and filename are required".to_string(),
            ));
        }
        Ok(())
    }

    async fn start_transfer(
        &self,
        track_ref: &TrackRef,
        _resume_from: u64,
    ) -> Result<TransferHandle, TransferError> {
        let parsed = Self::parse_ref(track_ref)?;

        let body = serde_json::json!([{
            "filename": parsed.filename,
            "size": parsed.size,
        }]);

        let response = self
            .client
            .post(self.downloads_url(&parsed.username))
            .header("X-API-Key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                return Err(TransferError::PeerUnavailable(parsed.username));
            }
            StatusCode::FORBIDDEN => {
                return Err(TransferError::Rejected(format!(
                    "{} refused {}",
                    parsed.username, parsed.filename
                )));
            }
            s if !s.is_success() => {
                return Err(TransferError::Api(format!("HTTP {}", s)));
            }
            _ => {}
        }

        // The enqueue response carries no transfer id; look it up from
        // the peer's download list by filename.
        let downloads = self.list_downloads(&parsed.username).await?;
        let entry = downloads
            .into_iter()
            .find(|t| t.filename == parsed.filename)
            .ok_or_else(|| {
                TransferError::TransferNotFound(format!(
                    "{}/{}",
                    parsed.username, parsed.filename
                ))
            })?;

        debug!(
            user = %parsed.username,
            transfer_id = %entry.id,
            "slskd transfer enqueued"
        );

        Ok(TransferHandle {
            remote_user: parsed.username,
            transfer_id: entry.id,
        })
    }

    async fn poll_transfer(
        &self,
        handle: &TransferHandle,
    ) -> Result<TransferSnapshot, TransferError> {
        let url = format!(
            "{}/{}",
            self.downloads_url(&handle.remote_user),
            urlencoding::encode(&handle.transfer_id)
        );

        let response = self
            .client
            .get(url)
            .header("X-API-Key", &self.config.api_key)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TransferError::TransferNotFound(handle.to_string()));
        }
        if !status.is_success() {
            return Err(TransferError::Api(format!("HTTP {}", status)));
        }

        let transfer: SlskdTransfer = response
            .json()
            .await
            .map_err(|e| TransferError::Api(e.to_string()))?;

        Ok(transfer.into_snapshot())
    }

    async fn cancel_transfer(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        let url = format!(
            "{}/{}?remove=false",
            self.downloads_url(&handle.remote_user),
            urlencoding::encode(&handle.transfer_id)
        );

        let response = self
            .client
            .delete(url)
            .header("X-API-Key", &self.config.api_key)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        // An already-gone transfer counts as aborted.
        if status == StatusCode::NOT_FOUND || status.is_success() {
            Ok(())
        } else {
            Err(TransferError::Api(format!("HTTP {}", status)))
        }
    }

    // slskd restarts interrupted downloads from zero.
    fn supports_resume(&self) -> bool {
        false
    }
}

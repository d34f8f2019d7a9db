//! Client-facing handle to the orchestrator.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::events::{EventBroadcaster, EventError, Subscription};
use crate::job::{DownloadJob, JobFilter, JobStore, Priority, TrackRef};
use crate::transfer::TransferClient;

use super::config::OrchestratorConfig;
use super::types::{BatchOp, BatchResult, Command, OrchestratorError, OrchestratorStatus};

/// Cloneable handle for issuing commands to the control loop.
///
/// Reads (job lookups, listings, event subscriptions) go straight to the
/// store and broadcaster; anything that mutates a job is funneled
/// through the loop's command channel.
#[derive(Clone)]
pub struct OrchestratorHandle {
    cmd_tx: mpsc::Sender<Command>,
    store: Arc<dyn JobStore>,
    client: Arc<dyn TransferClient>,
    broadcaster: Arc<EventBroadcaster>,
}

impl OrchestratorHandle {
    pub(crate) fn new(
        cmd_tx: mpsc::Sender<Command>,
        store: Arc<dyn JobStore>,
        client: Arc<dyn TransferClient>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            cmd_tx,
            store,
            client,
            broadcaster,
        }
    }

    async fn send<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, OrchestratorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| OrchestratorError::NotRunning)?;
        reply_rx.await.map_err(|_| OrchestratorError::NotRunning)
    }

    /// Submit a new download job.
    ///
    /// The track reference is resolved with the transfer client before
    /// the job is created, so an unresolvable reference is rejected here
    /// and never enters the queue.
    pub async fn submit(
        &self,
        track_ref: TrackRef,
        priority: Priority,
    ) -> Result<DownloadJob, OrchestratorError> {
        self.client.resolve(&track_ref).await?;
        self.send(|reply| Command::Submit {
            track_ref,
            priority,
            reply,
        })
        .await?
    }

    /// Pause a downloading job.
    pub async fn pause(&self, job_id: &str) -> Result<(), OrchestratorError> {
        self.send(|reply| Command::Pause {
            job_id: job_id.to_string(),
            reply,
        })
        .await?
    }

    /// Move a paused job back into the queue.
    pub async fn resume(&self, job_id: &str) -> Result<(), OrchestratorError> {
        self.send(|reply| Command::Resume {
            job_id: job_id.to_string(),
            reply,
        })
        .await?
    }

    /// Cancel a job in any non-terminal state.
    pub async fn cancel(&self, job_id: &str) -> Result<(), OrchestratorError> {
        self.send(|reply| Command::Cancel {
            job_id: job_id.to_string(),
            reply,
        })
        .await?
    }

    /// Manually retry a failed job, restarting its automatic retry budget.
    pub async fn retry(&self, job_id: &str) -> Result<(), OrchestratorError> {
        self.send(|reply| Command::Retry {
            job_id: job_id.to_string(),
            reply,
        })
        .await?
    }

    /// Change a job's priority. Takes effect the next time the job is
    /// considered for dispatch.
    pub async fn set_priority(
        &self,
        job_id: &str,
        priority: Priority,
    ) -> Result<(), OrchestratorError> {
        self.send(|reply| Command::SetPriority {
            job_id: job_id.to_string(),
            priority,
            reply,
        })
        .await?
    }

    /// Apply one operation to many jobs, returning a result per job.
    pub async fn batch(
        &self,
        op: BatchOp,
        job_ids: Vec<String>,
    ) -> Result<Vec<BatchResult>, OrchestratorError> {
        self.send(|reply| Command::Batch { op, job_ids, reply }).await
    }

    /// Adjust worker pool capacity at runtime.
    pub async fn set_capacity(&self, capacity: usize) -> Result<(), OrchestratorError> {
        self.send(|reply| Command::SetCapacity { capacity, reply })
            .await?
    }

    /// Hot-reload the orchestrator configuration.
    pub async fn reload_config(
        &self,
        config: OrchestratorConfig,
    ) -> Result<(), OrchestratorError> {
        self.send(|reply| Command::ReloadConfig { config, reply })
            .await?
    }

    /// Current orchestrator status.
    pub async fn status(&self) -> Result<OrchestratorStatus, OrchestratorError> {
        self.send(|reply| Command::Status { reply }).await
    }

    /// Stop dispatching, wind down active transfers and stop the loop.
    /// Resolves once the drain completes or times out.
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        self.send(|reply| Command::Shutdown { reply }).await
    }

    /// Fetch a single job.
    pub fn get_job(&self, job_id: &str) -> Result<Option<DownloadJob>, OrchestratorError> {
        Ok(self.store.get(job_id)?)
    }

    /// List jobs matching a filter.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<DownloadJob>, OrchestratorError> {
        Ok(self.store.list(filter)?)
    }

    /// Subscribe to the event stream, optionally replaying everything
    /// after a known sequence number first.
    pub fn subscribe(&self, since: Option<u64>) -> Result<Subscription, EventError> {
        self.broadcaster.subscribe(since)
    }

    /// Sequence number of the most recently published event.
    pub fn last_seq(&self) -> u64 {
        self.broadcaster.last_seq()
    }
}

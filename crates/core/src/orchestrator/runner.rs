//! Download orchestrator control loop.
//!
//! All job state changes flow through a single task that owns the worker
//! pool, the retry schedule and the pending-abort bookkeeping. Workers
//! drive one transfer each and report back over a channel; they never
//! touch the job store directly, so there is exactly one writer and no
//! transition races.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::events::{EventBroadcaster, JobEvent};
use crate::job::{
    CreateJobRequest, DownloadJob, JobFilter, JobSort, JobStatus, JobStore, Priority, SortOrder,
    TrackRef, WorkerId,
};
use crate::retry::RetryDecision;
use crate::transfer::{TransferClient, TransferError, TransferState};

use super::config::OrchestratorConfig;
use super::handle::OrchestratorHandle;
use super::pool::WorkerPool;
use super::scheduler;
use super::types::{
    BatchOp, BatchResult, Command, OrchestratorError, OrchestratorStatus, WorkerEvent,
    WorkerOutcome,
};

const COMMAND_BUFFER: usize = 64;
const WORKER_EVENT_BUFFER: usize = 256;

/// Consecutive poll failures tolerated before a worker gives up on its
/// transfer. A single failed poll is usually a blip, not a dead peer.
const MAX_POLL_FAILURES: u32 = 3;

/// Upper bound on queued jobs considered per dispatch round.
const DISPATCH_SCAN_LIMIT: i64 = 1024;

/// Download orchestrator.
///
/// Construct with its collaborators, then call [`start`](Self::start) to
/// spawn the control loop and get a handle for issuing commands.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    client: Arc<dyn TransferClient>,
    broadcaster: Arc<EventBroadcaster>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        client: Arc<dyn TransferClient>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            config,
            store,
            client,
            broadcaster,
        }
    }

    /// Spawn the control loop and return a handle to it.
    ///
    /// Jobs left in `Downloading` by a previous process are requeued
    /// before the loop starts taking commands.
    pub fn start(self) -> OrchestratorHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (worker_tx, worker_rx) = mpsc::channel(WORKER_EVENT_BUFFER);

        let handle = OrchestratorHandle::new(
            cmd_tx,
            self.store.clone(),
            self.client.clone(),
            self.broadcaster.clone(),
        );

        let control = ControlLoop {
            pool: WorkerPool::new(self.config.worker_capacity),
            config: self.config,
            store: self.store,
            client: self.client,
            broadcaster: self.broadcaster,
            cmd_rx,
            worker_tx,
            worker_rx,
            backoff: BinaryHeap::new(),
            pending_stops: HashMap::new(),
            draining: None,
        };

        tokio::spawn(control.run());

        handle
    }
}

/// An abort request sent to a worker, waiting for its acknowledgement.
struct PendingStop {
    /// Status to apply once the worker confirms the abort.
    target: JobStatus,
    /// Force-mark deadline if no acknowledgement arrives.
    deadline: Instant,
}

struct ControlLoop {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    client: Arc<dyn TransferClient>,
    broadcaster: Arc<EventBroadcaster>,
    pool: WorkerPool,
    cmd_rx: mpsc::Receiver<Command>,
    worker_tx: mpsc::Sender<WorkerEvent>,
    worker_rx: mpsc::Receiver<WorkerEvent>,
    /// Scheduled retries, ordered by due time.
    backoff: BinaryHeap<Reverse<(Instant, String)>>,
    /// Jobs with an abort in flight, keyed by job id.
    pending_stops: HashMap<String, PendingStop>,
    /// Set once a shutdown command arrives: drain deadline plus the
    /// reply to send when the last worker finishes.
    draining: Option<(Instant, oneshot::Sender<()>)>,
}

impl ControlLoop {
    async fn run(mut self) {
        info!("Download orchestrator started");
        self.recover();
        self.dispatch();

        loop {
            let wake = self.next_wake();
            let wake_at = wake.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown { reply }) => self.begin_drain(reply),
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                Some(event) = self.worker_rx.recv() => {
                    self.handle_worker_event(event);
                }
                _ = time::sleep_until(wake_at), if wake.is_some() => {
                    self.fire_timers();
                }
            }

            if self.drain_finished() {
                break;
            }
            self.dispatch();
        }

        info!("Download orchestrator stopped");
    }

    /// Jobs stuck in `Downloading` from a previous run have no live
    /// transfer attached; put them back in the queue.
    fn recover(&self) {
        match self.store.recover_in_flight() {
            Ok(jobs) if !jobs.is_empty() => {
                for job in &jobs {
                    self.publish(JobEvent::StateChanged {
                        job_id: job.id.clone(),
                        from: JobStatus::Downloading,
                        to: JobStatus::Queued,
                        reason: Some("recovered after restart".to_string()),
                    });
                }
                info!("Requeued {} interrupted downloads", jobs.len());
            }
            Ok(_) => {}
            Err(e) => error!("Failed to recover interrupted downloads: {}", e),
        }
    }

    fn publish(&self, event: JobEvent) {
        self.broadcaster.publish(event);
    }

    // Timers

    fn next_wake(&self) -> Option<Instant> {
        let mut wake: Option<Instant> = None;
        let mut consider = |t: Instant| {
            wake = Some(match wake {
                Some(current) => current.min(t),
                None => t,
            });
        };

        if let Some(Reverse((due, _))) = self.backoff.peek() {
            consider(*due);
        }
        for stop in self.pending_stops.values() {
            consider(stop.deadline);
        }
        if let Some((deadline, _)) = &self.draining {
            consider(*deadline);
        }

        wake
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();

        while let Some(Reverse((due, _))) = self.backoff.peek() {
            if *due > now {
                break;
            }
            if let Some(Reverse((_, job_id))) = self.backoff.pop() {
                self.requeue_for_retry(&job_id);
            }
        }

        let expired: Vec<String> = self
            .pending_stops
            .iter()
            .filter(|(_, stop)| stop.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for job_id in expired {
            self.force_stop(&job_id);
        }
    }

    /// A backoff delay elapsed; move the job back into the queue unless
    /// something else (cancel, manual retry) already moved it.
    fn requeue_for_retry(&mut self, job_id: &str) {
        let job = match self.store.get(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to load job {} for retry: {}", job_id, e);
                return;
            }
        };

        if job.status != JobStatus::Failed {
            debug!(
                "Skipping stale retry for job {} (now {})",
                job_id, job.status
            );
            return;
        }

        if let Err(e) = self.store.reset_progress(job_id) {
            warn!("Failed to reset progress for job {}: {}", job_id, e);
        }
        match self.store.transition(job_id, JobStatus::Queued, None) {
            Ok(_) => {
                self.publish(JobEvent::StateChanged {
                    job_id: job_id.to_string(),
                    from: JobStatus::Failed,
                    to: JobStatus::Queued,
                    reason: Some("scheduled retry".to_string()),
                });
            }
            Err(e) => warn!("Failed to requeue job {} for retry: {}", job_id, e),
        }
    }

    /// The worker never acknowledged an abort within the deadline; free
    /// the slot and mark the job anyway so the user's command sticks.
    fn force_stop(&mut self, job_id: &str) {
        let Some(stop) = self.pending_stops.remove(job_id) else {
            return;
        };

        warn!(
            "Abort for job {} not acknowledged within {}ms, force-marking {}",
            job_id, self.config.abort_ack_timeout_ms, stop.target
        );

        if let Some((worker_id, _)) = self.pool.find_by_job(job_id) {
            if let Some(transfer) = self.pool.release(worker_id) {
                debug!(
                    "Releasing worker {} after {}s on job {}",
                    worker_id,
                    (Utc::now() - transfer.started_at).num_seconds(),
                    job_id
                );
                if let Some(task) = transfer.task {
                    task.abort();
                }
            }
        }

        if stop.target == JobStatus::Paused && !self.client.supports_resume() {
            if let Err(e) = self.store.reset_progress(job_id) {
                warn!("Failed to reset progress for job {}: {}", job_id, e);
            }
        }

        match self.store.transition(job_id, stop.target, None) {
            Ok(_) => {
                self.publish(JobEvent::StateChanged {
                    job_id: job_id.to_string(),
                    from: JobStatus::Downloading,
                    to: stop.target,
                    reason: Some("abort timeout".to_string()),
                });
            }
            Err(e) => warn!("Failed to force-mark job {}: {}", job_id, e),
        }
    }

    // Shutdown

    fn begin_drain(&mut self, reply: oneshot::Sender<()>) {
        info!(
            "Shutting down, waiting for {} active transfers",
            self.pool.active_count()
        );
        for (_, transfer) in self.pool.iter() {
            let _ = transfer.abort_tx.try_send(());
        }
        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_timeout_ms);
        self.draining = Some((deadline, reply));
    }

    fn drain_finished(&mut self) -> bool {
        let done = match &self.draining {
            Some((deadline, _)) => {
                self.pool.active_count() == 0 || *deadline <= Instant::now()
            }
            None => false,
        };

        if !done {
            return false;
        }

        if self.pool.active_count() > 0 {
            warn!(
                "Shutdown timed out with {} transfers still active",
                self.pool.active_count()
            );
            for (_, transfer) in self.pool.iter() {
                if let Some(task) = &transfer.task {
                    task.abort();
                }
            }
        }

        if let Some((_, reply)) = self.draining.take() {
            let _ = reply.send(());
        }
        true
    }

    // Commands

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit {
                track_ref,
                priority,
                reply,
            } => {
                let _ = reply.send(self.submit_job(track_ref, priority));
            }
            Command::Pause { job_id, reply } => {
                let _ = reply.send(self.pause_job(&job_id));
            }
            Command::Resume { job_id, reply } => {
                let _ = reply.send(self.resume_job(&job_id));
            }
            Command::Cancel { job_id, reply } => {
                let _ = reply.send(self.cancel_job(&job_id));
            }
            Command::Retry { job_id, reply } => {
                let _ = reply.send(self.retry_job(&job_id));
            }
            Command::SetPriority {
                job_id,
                priority,
                reply,
            } => {
                let _ = reply.send(self.set_job_priority(&job_id, priority));
            }
            Command::Batch {
                op,
                job_ids,
                reply,
            } => {
                let _ = reply.send(self.apply_batch(op, job_ids));
            }
            Command::SetCapacity { capacity, reply } => {
                let _ = reply.send(self.set_capacity(capacity));
            }
            Command::ReloadConfig { config, reply } => {
                let _ = reply.send(self.reload_config(config));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.build_status());
            }
            Command::Shutdown { .. } => unreachable!("handled in run()"),
        }
    }

    fn submit_job(
        &mut self,
        track_ref: TrackRef,
        priority: Priority,
    ) -> Result<DownloadJob, OrchestratorError> {
        let job = self.store.create(CreateJobRequest {
            track_ref,
            priority,
        })?;
        info!("Job {} submitted with priority {}", job.id, job.priority);
        self.publish(JobEvent::JobSubmitted {
            job_id: job.id.clone(),
            priority: job.priority,
        });
        Ok(job)
    }

    fn get_job(&self, job_id: &str) -> Result<DownloadJob, OrchestratorError> {
        match self.store.get(job_id)? {
            Some(job) => Ok(job),
            None => Err(OrchestratorError::JobNotFound(job_id.to_string())),
        }
    }

    fn pause_job(&mut self, job_id: &str) -> Result<(), OrchestratorError> {
        let job = self.get_job(job_id)?;
        match job.status {
            JobStatus::Downloading => {
                self.request_stop(job_id, JobStatus::Paused);
                Ok(())
            }
            other => Err(OrchestratorError::Conflict {
                job_id: job_id.to_string(),
                status: other,
                operation: "pause".to_string(),
            }),
        }
    }

    fn resume_job(&mut self, job_id: &str) -> Result<(), OrchestratorError> {
        let job = self.get_job(job_id)?;
        if job.status != JobStatus::Paused {
            return Err(OrchestratorError::Conflict {
                job_id: job_id.to_string(),
                status: job.status,
                operation: "resume".to_string(),
            });
        }

        self.store.transition(job_id, JobStatus::Queued, None)?;
        self.publish(JobEvent::StateChanged {
            job_id: job_id.to_string(),
            from: JobStatus::Paused,
            to: JobStatus::Queued,
            reason: Some("resumed".to_string()),
        });
        Ok(())
    }

    fn cancel_job(&mut self, job_id: &str) -> Result<(), OrchestratorError> {
        let job = self.get_job(job_id)?;
        match job.status {
            JobStatus::Downloading => {
                self.request_stop(job_id, JobStatus::Cancelled);
                Ok(())
            }
            JobStatus::Queued | JobStatus::Paused | JobStatus::Failed => {
                self.store.transition(job_id, JobStatus::Cancelled, None)?;
                // Drop any retry still scheduled for it.
                self.backoff.retain(|Reverse((_, id))| id != job_id);
                self.publish(JobEvent::StateChanged {
                    job_id: job_id.to_string(),
                    from: job.status,
                    to: JobStatus::Cancelled,
                    reason: None,
                });
                Ok(())
            }
            other => Err(OrchestratorError::Conflict {
                job_id: job_id.to_string(),
                status: other,
                operation: "cancel".to_string(),
            }),
        }
    }

    fn retry_job(&mut self, job_id: &str) -> Result<(), OrchestratorError> {
        let job = self.get_job(job_id)?;
        if job.status != JobStatus::Failed {
            return Err(OrchestratorError::Conflict {
                job_id: job_id.to_string(),
                status: job.status,
                operation: "retry".to_string(),
            });
        }

        // A manual retry restarts the automatic budget from here.
        self.store.mark_manual_retry(job_id)?;
        self.store.reset_progress(job_id)?;
        self.store.transition(job_id, JobStatus::Queued, None)?;
        self.backoff.retain(|Reverse((_, id))| id != job_id);
        self.publish(JobEvent::StateChanged {
            job_id: job_id.to_string(),
            from: JobStatus::Failed,
            to: JobStatus::Queued,
            reason: Some("manual retry".to_string()),
        });
        Ok(())
    }

    fn set_job_priority(
        &mut self,
        job_id: &str,
        priority: Priority,
    ) -> Result<(), OrchestratorError> {
        let job = self.store.set_priority(job_id, priority)?;
        self.publish(JobEvent::PriorityChanged {
            job_id: job.id,
            priority,
        });
        Ok(())
    }

    /// Per-job application of a batch command; one bad id never stops
    /// the rest.
    fn apply_batch(&mut self, op: BatchOp, job_ids: Vec<String>) -> Vec<BatchResult> {
        job_ids
            .into_iter()
            .map(|job_id| {
                let result = match op {
                    BatchOp::Pause => self.pause_job(&job_id),
                    BatchOp::Resume => self.resume_job(&job_id),
                    BatchOp::Cancel => self.cancel_job(&job_id),
                    BatchOp::Retry => self.retry_job(&job_id),
                    BatchOp::SetPriority(priority) => self.set_job_priority(&job_id, priority),
                };
                match result {
                    Ok(()) => BatchResult::success(job_id),
                    Err(e) => {
                        debug!("Batch {} failed for job {}: {}", op.as_str(), job_id, e);
                        BatchResult::failure(job_id, &e)
                    }
                }
            })
            .collect()
    }

    fn set_capacity(&mut self, capacity: usize) -> Result<(), OrchestratorError> {
        let previous = self.pool.set_capacity(capacity);
        if previous != capacity {
            info!("Worker capacity changed from {} to {}", previous, capacity);
            self.publish(JobEvent::PoolCapacityChanged { capacity, previous });
        }
        Ok(())
    }

    fn reload_config(&mut self, config: OrchestratorConfig) -> Result<(), OrchestratorError> {
        let previous = self.pool.set_capacity(config.worker_capacity);
        if previous != config.worker_capacity {
            self.publish(JobEvent::PoolCapacityChanged {
                capacity: config.worker_capacity,
                previous,
            });
        }
        self.config = config;
        info!("Orchestrator configuration reloaded");
        self.publish(JobEvent::ConfigReloaded);
        Ok(())
    }

    fn build_status(&self) -> OrchestratorStatus {
        let count = |status: JobStatus| -> usize {
            self.store
                .count(&JobFilter::new().with_status(status))
                .unwrap_or(0) as usize
        };

        OrchestratorStatus {
            running: self.draining.is_none(),
            capacity: self.pool.capacity(),
            active_workers: self.pool.active_count(),
            queued_count: count(JobStatus::Queued),
            downloading_count: count(JobStatus::Downloading),
            paused_count: count(JobStatus::Paused),
            failed_count: count(JobStatus::Failed),
            scheduled_retries: self.backoff.len(),
        }
    }

    /// Ask the worker owning a job to abort its transfer and remember
    /// what to mark the job once it confirms.
    fn request_stop(&mut self, job_id: &str, target: JobStatus) {
        if let Some((_, transfer)) = self.pool.find_by_job(job_id) {
            let _ = transfer.abort_tx.try_send(());
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.abort_ack_timeout_ms);
        match self.pending_stops.get_mut(job_id) {
            // Cancel overrides a pause already in flight; never the
            // other way around.
            Some(stop) => {
                if target == JobStatus::Cancelled {
                    stop.target = JobStatus::Cancelled;
                }
            }
            None => {
                self.pending_stops
                    .insert(job_id.to_string(), PendingStop { target, deadline });
            }
        }
    }

    // Worker events

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress {
                worker_id,
                job_id,
                progress_bytes,
                total_bytes,
            } => {
                // Only the worker that still owns the job reports for it.
                let owns = self
                    .pool
                    .find_by_job(&job_id)
                    .map(|(w, _)| w == worker_id)
                    .unwrap_or(false);
                if !owns || self.pending_stops.contains_key(&job_id) {
                    return;
                }

                match self.store.update_progress(&job_id, progress_bytes, total_bytes) {
                    Ok(job) => self.publish(JobEvent::Progress {
                        job_id,
                        progress_bytes: job.progress_bytes,
                        total_bytes: job.total_bytes,
                    }),
                    Err(e) => debug!("Dropped progress update for job {}: {}", job_id, e),
                }
            }
            WorkerEvent::Finished {
                worker_id,
                job_id,
                outcome,
            } => {
                if self.pool.release(worker_id).is_none() {
                    // Slot already force-released after an ack timeout.
                    debug!("Ignoring event from released worker {}", worker_id);
                    return;
                }
                self.finish_job(&job_id, outcome);
            }
        }
    }

    fn finish_job(&mut self, job_id: &str, outcome: WorkerOutcome) {
        match outcome {
            WorkerOutcome::Completed { bytes, total } => {
                // Completion wins over a stop requested in the meantime.
                self.pending_stops.remove(job_id);
                if let Err(e) = self.store.update_progress(job_id, bytes, total) {
                    warn!("Failed to record final progress for job {}: {}", job_id, e);
                }
                match self.store.transition(job_id, JobStatus::Completed, None) {
                    Ok(_) => {
                        info!("Job {} completed", job_id);
                        self.publish(JobEvent::StateChanged {
                            job_id: job_id.to_string(),
                            from: JobStatus::Downloading,
                            to: JobStatus::Completed,
                            reason: None,
                        });
                    }
                    Err(e) => warn!("Failed to complete job {}: {}", job_id, e),
                }
            }
            WorkerOutcome::Aborted => match self.pending_stops.remove(job_id) {
                Some(stop) => self.finalize_stop(job_id, stop.target),
                None if self.draining.is_some() => {
                    // Shutdown abort. The job stays Downloading and is
                    // requeued by recovery on the next start.
                    debug!("Job {} interrupted by shutdown", job_id);
                }
                // The client dropped the transfer without us asking.
                None => self.fail_job(job_id, "transfer cancelled by client".to_string(), true),
            },
            WorkerOutcome::Failed { message, transient } => {
                // A user stop beats the failure it raced with.
                match self.pending_stops.remove(job_id) {
                    Some(stop) => self.finalize_stop(job_id, stop.target),
                    None => self.fail_job(job_id, message, transient),
                }
            }
        }
    }

    fn finalize_stop(&mut self, job_id: &str, target: JobStatus) {
        if target == JobStatus::Paused && !self.client.supports_resume() {
            if let Err(e) = self.store.reset_progress(job_id) {
                warn!("Failed to reset progress for job {}: {}", job_id, e);
            }
        }

        match self.store.transition(job_id, target, None) {
            Ok(_) => {
                info!("Job {} stopped, now {}", job_id, target);
                self.publish(JobEvent::StateChanged {
                    job_id: job_id.to_string(),
                    from: JobStatus::Downloading,
                    to: target,
                    reason: None,
                });
            }
            Err(e) => warn!("Failed to stop job {}: {}", job_id, e),
        }
    }

    fn fail_job(&mut self, job_id: &str, message: String, transient: bool) {
        let job = match self
            .store
            .transition(job_id, JobStatus::Failed, Some(message.clone()))
        {
            Ok(job) => job,
            Err(e) => {
                warn!("Failed to mark job {} as failed: {}", job_id, e);
                return;
            }
        };

        self.publish(JobEvent::StateChanged {
            job_id: job_id.to_string(),
            from: JobStatus::Downloading,
            to: JobStatus::Failed,
            reason: Some(message.clone()),
        });

        let attempts = job.attempts_since_retry();
        match self.config.retry.decide(attempts, transient) {
            RetryDecision::RetryAfter(delay) => {
                let eligible_at =
                    Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                self.backoff
                    .push(Reverse((Instant::now() + delay, job_id.to_string())));
                info!(
                    "Job {} failed (attempt {}), retrying in {}ms: {}",
                    job_id,
                    attempts,
                    delay.as_millis(),
                    message
                );
                self.publish(JobEvent::RetryScheduled {
                    job_id: job_id.to_string(),
                    attempt: attempts,
                    delay_ms: delay.as_millis() as u64,
                    eligible_at,
                });
            }
            RetryDecision::GiveUp => {
                info!(
                    "Job {} failed permanently after {} attempts: {}",
                    job_id, attempts, message
                );
            }
        }
    }

    // Dispatch

    fn dispatch(&mut self) {
        if self.draining.is_some() {
            return;
        }

        let idle = self.pool.idle_slots();
        if idle == 0 {
            return;
        }

        // Scan in dispatch order so the bounded window never hides a
        // higher-priority job behind a large low-priority backlog.
        let queued = match self.store.list(
            &JobFilter::new()
                .with_status(JobStatus::Queued)
                .sorted_by(JobSort::Priority, SortOrder::Asc)
                .with_limit(DISPATCH_SCAN_LIMIT),
        ) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to list queued jobs: {}", e);
                return;
            }
        };

        for job_id in scheduler::plan_dispatch(&queued, idle) {
            if let Some(job) = queued.iter().find(|j| j.id == job_id) {
                self.start_worker(job.clone());
            }
        }
    }

    fn start_worker(&mut self, job: DownloadJob) {
        let (abort_tx, abort_rx) = mpsc::channel(1);
        let worker_id = match self.pool.claim(&job.id, abort_tx) {
            Some(id) => id,
            None => return,
        };

        // Claim first, transition second: if the job was cancelled
        // between listing and dispatch, release the slot and move on.
        if let Err(e) = self.store.transition(&job.id, JobStatus::Downloading, None) {
            debug!("Skipping dispatch of job {}: {}", job.id, e);
            self.pool.release(worker_id);
            return;
        }

        if let Err(e) = self.store.set_assigned_worker(&job.id, Some(worker_id)) {
            warn!("Failed to record worker for job {}: {}", job.id, e);
        }
        if let Err(e) = self.store.increment_retry_count(&job.id) {
            warn!("Failed to count attempt for job {}: {}", job.id, e);
        }

        self.publish(JobEvent::StateChanged {
            job_id: job.id.clone(),
            from: JobStatus::Queued,
            to: JobStatus::Downloading,
            reason: None,
        });
        debug!("Dispatching job {} to worker {}", job.id, worker_id);

        let resume_from = if self.client.supports_resume() {
            job.progress_bytes
        } else {
            0
        };

        let task = tokio::spawn(run_worker(
            worker_id,
            job.id.clone(),
            job.track_ref,
            resume_from,
            self.client.clone(),
            Duration::from_millis(self.config.poll_interval_ms),
            self.worker_tx.clone(),
            abort_rx,
        ));
        self.pool.attach_task(worker_id, task);
    }
}

/// A single transfer attempt, start to finish.
///
/// The worker owns nothing but its transfer handle: all job state flows
/// back to the control loop as [`WorkerEvent`]s.
#[allow(clippy::too_many_arguments)]
async fn run_worker(
    worker_id: WorkerId,
    job_id: String,
    track_ref: TrackRef,
    resume_from: u64,
    client: Arc<dyn TransferClient>,
    poll_interval: Duration,
    events: mpsc::Sender<WorkerEvent>,
    mut abort_rx: mpsc::Receiver<()>,
) {
    let finish = |outcome: WorkerOutcome| WorkerEvent::Finished {
        worker_id,
        job_id: job_id.clone(),
        outcome,
    };

    let handle = match client.start_transfer(&track_ref, resume_from).await {
        Ok(handle) => handle,
        Err(e) => {
            let _ = events
                .send(finish(WorkerOutcome::Failed {
                    message: e.to_string(),
                    transient: e.is_transient(),
                }))
                .await;
            return;
        }
    };
    debug!(
        "Worker {} started transfer {} for job {}",
        worker_id, handle, job_id
    );

    let mut poll_failures = 0u32;
    loop {
        tokio::select! {
            _ = abort_rx.recv() => {
                if let Err(e) = client.cancel_transfer(&handle).await {
                    warn!("Cancel request for job {} failed: {}", job_id, e);
                }
                let _ = events.send(finish(WorkerOutcome::Aborted)).await;
                return;
            }
            _ = time::sleep(poll_interval) => {
                match client.poll_transfer(&handle).await {
                    Ok(snapshot) => {
                        poll_failures = 0;
                        match snapshot.state {
                            TransferState::Succeeded => {
                                let _ = events
                                    .send(finish(WorkerOutcome::Completed {
                                        bytes: snapshot.bytes_transferred,
                                        total: snapshot.size_bytes,
                                    }))
                                    .await;
                                return;
                            }
                            TransferState::Cancelled => {
                                let _ = events.send(finish(WorkerOutcome::Aborted)).await;
                                return;
                            }
                            TransferState::Errored | TransferState::TimedOut => {
                                let message = snapshot
                                    .error
                                    .unwrap_or_else(|| format!("transfer {}", snapshot.state));
                                let _ = events
                                    .send(finish(WorkerOutcome::Failed {
                                        message,
                                        transient: true,
                                    }))
                                    .await;
                                return;
                            }
                            TransferState::Rejected => {
                                let message = snapshot
                                    .error
                                    .unwrap_or_else(|| "transfer rejected by peer".to_string());
                                let _ = events
                                    .send(finish(WorkerOutcome::Failed {
                                        message,
                                        transient: false,
                                    }))
                                    .await;
                                return;
                            }
                            _ => {
                                let _ = events
                                    .send(WorkerEvent::Progress {
                                        worker_id,
                                        job_id: job_id.clone(),
                                        progress_bytes: snapshot.bytes_transferred,
                                        total_bytes: snapshot.size_bytes,
                                    })
                                    .await;
                            }
                        }
                    }
                    Err(e) => {
                        poll_failures += 1;
                        let fatal = matches!(e, TransferError::TransferNotFound(_))
                            || poll_failures >= MAX_POLL_FAILURES;
                        if fatal {
                            let _ = events
                                .send(finish(WorkerOutcome::Failed {
                                    message: e.to_string(),
                                    transient: e.is_transient(),
                                }))
                                .await;
                            return;
                        }
                        debug!(
                            "Poll {}/{} failed for job {}: {}",
                            poll_failures, MAX_POLL_FAILURES, job_id, e
                        );
                    }
                }
            }
        }
    }
}

//! Worker slot bookkeeping.
//!
//! The pool is owned by the control loop and never shared, so it is
//! plain single-threaded state. A slot claim is non-blocking: when all
//! slots are taken the job simply stays queued until a worker finishes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::job::WorkerId;

/// A worker slot with an in-flight transfer.
pub(crate) struct ActiveTransfer {
    /// Job owning the slot.
    pub job_id: String,
    /// Signals the worker task to abort its transfer.
    pub abort_tx: mpsc::Sender<()>,
    /// The worker task. Attached right after the slot is claimed; only
    /// used to hard-abort a worker that missed its ack deadline.
    pub task: Option<JoinHandle<()>>,
    /// When the slot was claimed.
    pub started_at: DateTime<Utc>,
}

/// Bounded set of worker slots.
pub(crate) struct WorkerPool {
    capacity: usize,
    next_worker_id: WorkerId,
    active: HashMap<WorkerId, ActiveTransfer>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_worker_id: 1,
            active: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the slot count. Lowering it below the number of active
    /// workers never interrupts them; the pool just stops granting new
    /// claims until enough workers finish. Returns the previous value.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        std::mem::replace(&mut self.capacity, capacity)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn idle_slots(&self) -> usize {
        self.capacity.saturating_sub(self.active.len())
    }

    /// Claim a slot for a job. Returns `None` without blocking when the
    /// pool is full.
    pub fn claim(&mut self, job_id: &str, abort_tx: mpsc::Sender<()>) -> Option<WorkerId> {
        if self.idle_slots() == 0 {
            return None;
        }

        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;
        self.active.insert(
            worker_id,
            ActiveTransfer {
                job_id: job_id.to_string(),
                abort_tx,
                task: None,
                started_at: Utc::now(),
            },
        );
        Some(worker_id)
    }

    /// Attach the spawned worker task to a claimed slot.
    pub fn attach_task(&mut self, worker_id: WorkerId, task: JoinHandle<()>) {
        if let Some(transfer) = self.active.get_mut(&worker_id) {
            transfer.task = Some(task);
        }
    }

    /// Free a slot, returning its transfer record if the worker was known.
    pub fn release(&mut self, worker_id: WorkerId) -> Option<ActiveTransfer> {
        self.active.remove(&worker_id)
    }

    /// Find the worker currently assigned to a job.
    pub fn find_by_job(&self, job_id: &str) -> Option<(WorkerId, &ActiveTransfer)> {
        self.active
            .iter()
            .find(|(_, t)| t.job_id == job_id)
            .map(|(id, t)| (*id, t))
    }

    /// Iterate over all active transfers.
    pub fn iter(&self) -> impl Iterator<Item = (WorkerId, &ActiveTransfer)> {
        self.active.iter().map(|(id, t)| (*id, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abort_channel() -> mpsc::Sender<()> {
        let (tx, _rx) = mpsc::channel(1);
        tx
    }

    #[test]
    fn test_claim_until_full() {
        let mut pool = WorkerPool::new(2);
        assert_eq!(pool.idle_slots(), 2);

        let w1 = pool.claim("a", abort_channel()).unwrap();
        let w2 = pool.claim("b", abort_channel()).unwrap();
        assert_ne!(w1, w2);
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.idle_slots(), 0);

        assert!(pool.claim("c", abort_channel()).is_none());
    }

    #[test]
    fn test_release_frees_slot() {
        let mut pool = WorkerPool::new(1);
        let w1 = pool.claim("a", abort_channel()).unwrap();
        assert!(pool.claim("b", abort_channel()).is_none());

        let released = pool.release(w1).unwrap();
        assert_eq!(released.job_id, "a");
        assert!(pool.claim("b", abort_channel()).is_some());
    }

    #[test]
    fn test_lowering_capacity_keeps_active_workers() {
        let mut pool = WorkerPool::new(3);
        let w1 = pool.claim("a", abort_channel()).unwrap();
        let _w2 = pool.claim("b", abort_channel()).unwrap();

        let previous = pool.set_capacity(1);
        assert_eq!(previous, 3);
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.idle_slots(), 0);
        assert!(pool.claim("c", abort_channel()).is_none());

        // Slots over capacity drain naturally as workers finish.
        pool.release(w1);
        assert_eq!(pool.idle_slots(), 0);
    }

    #[test]
    fn test_raising_capacity_opens_slots() {
        let mut pool = WorkerPool::new(1);
        pool.claim("a", abort_channel()).unwrap();
        assert_eq!(pool.idle_slots(), 0);

        pool.set_capacity(4);
        assert_eq!(pool.idle_slots(), 3);
    }

    #[test]
    fn test_find_by_job() {
        let mut pool = WorkerPool::new(2);
        let w1 = pool.claim("a", abort_channel()).unwrap();
        pool.claim("b", abort_channel()).unwrap();

        let (found, transfer) = pool.find_by_job("a").unwrap();
        assert_eq!(found, w1);
        assert_eq!(transfer.job_id, "a");
        assert!(pool.find_by_job("missing").is_none());
    }

    #[test]
    fn test_worker_ids_are_not_reused() {
        let mut pool = WorkerPool::new(1);
        let w1 = pool.claim("a", abort_channel()).unwrap();
        pool.release(w1);
        let w2 = pool.claim("b", abort_channel()).unwrap();
        assert!(w2 > w1);
    }
}

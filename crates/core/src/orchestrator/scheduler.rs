//! Dispatch planning.
//!
//! Pure ordering logic, kept separate from the control loop so the
//! priority contract is testable without any async machinery.

use crate::job::DownloadJob;

/// Pick the jobs to dispatch next, in order.
///
/// Jobs are ranked by priority (P0 first), then submission time, then id
/// as the final tie-break so the order is total and deterministic. At
/// most `idle_slots` jobs are returned; a slot freed later triggers a
/// fresh plan, so lower-priority jobs are never starved permanently,
/// just deferred.
pub fn plan_dispatch(queued: &[DownloadJob], idle_slots: usize) -> Vec<String> {
    if idle_slots == 0 || queued.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<&DownloadJob> = queued.iter().collect();
    ranked.sort_by(|a, b| {
        a.priority
            .rank()
            .cmp(&b.priority.rank())
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    ranked
        .into_iter()
        .take(idle_slots)
        .map(|job| job.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, Priority, TrackRef};
    use chrono::{Duration, Utc};

    fn job(id: &str, priority: Priority, age_secs: i64) -> DownloadJob {
        let created = Utc::now() - Duration::seconds(age_secs);
        DownloadJob {
            id: id.to_string(),
            track_ref: TrackRef::new("peer@file"),
            priority,
            status: JobStatus::Queued,
            progress_bytes: 0,
            total_bytes: 0,
            retry_count: 0,
            retry_floor: 0,
            last_error: None,
            assigned_worker: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_priority_beats_age() {
        // Submitted in order P2, P0, P1; dispatch order must be P0, P1, P2.
        let jobs = vec![
            job("a", Priority::P2, 30),
            job("b", Priority::P0, 20),
            job("c", Priority::P1, 10),
        ];

        let plan = plan_dispatch(&jobs, 3);
        assert_eq!(plan, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let jobs = vec![
            job("newer", Priority::P1, 5),
            job("older", Priority::P1, 50),
        ];

        let plan = plan_dispatch(&jobs, 2);
        assert_eq!(plan, vec!["older", "newer"]);
    }

    #[test]
    fn test_id_breaks_timestamp_ties() {
        let created = Utc::now();
        let mut a = job("bbb", Priority::P1, 0);
        let mut b = job("aaa", Priority::P1, 0);
        a.created_at = created;
        b.created_at = created;

        let plan = plan_dispatch(&[a, b], 2);
        assert_eq!(plan, vec!["aaa", "bbb"]);
    }

    #[test]
    fn test_truncated_to_idle_slots() {
        let jobs = vec![
            job("a", Priority::P0, 3),
            job("b", Priority::P1, 2),
            job("c", Priority::P2, 1),
        ];

        let plan = plan_dispatch(&jobs, 1);
        assert_eq!(plan, vec!["a"]);
    }

    #[test]
    fn test_no_slots_no_plan() {
        let jobs = vec![job("a", Priority::P0, 1)];
        assert!(plan_dispatch(&jobs, 0).is_empty());
        assert!(plan_dispatch(&[], 4).is_empty());
    }
}

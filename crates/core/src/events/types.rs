//! Orchestrator event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobStatus, Priority};

/// Events published by the orchestrator.
///
/// Every state transition, progress update and pool change produces one
/// of these; subscribers drive UIs and logs from the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A new job entered the queue.
    JobSubmitted {
        job_id: String,
        priority: Priority,
    },

    /// A job moved through the state machine.
    StateChanged {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Transfer progress for a downloading job.
    Progress {
        job_id: String,
        progress_bytes: u64,
        total_bytes: u64,
    },

    /// A job's priority was changed.
    PriorityChanged {
        job_id: String,
        priority: Priority,
    },

    /// A failed job was scheduled for another attempt.
    RetryScheduled {
        job_id: String,
        attempt: u32,
        delay_ms: u64,
        eligible_at: DateTime<Utc>,
    },

    /// The worker pool capacity was adjusted.
    PoolCapacityChanged {
        capacity: usize,
        previous: usize,
    },

    /// The orchestrator configuration was hot-reloaded.
    ConfigReloaded,
}

impl JobEvent {
    /// Returns the event type as a string (for filtering and storage).
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::JobSubmitted { .. } => "job_submitted",
            JobEvent::StateChanged { .. } => "state_changed",
            JobEvent::Progress { .. } => "progress",
            JobEvent::PriorityChanged { .. } => "priority_changed",
            JobEvent::RetryScheduled { .. } => "retry_scheduled",
            JobEvent::PoolCapacityChanged { .. } => "pool_capacity_changed",
            JobEvent::ConfigReloaded => "config_reloaded",
        }
    }

    /// Returns the job this event concerns, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobEvent::JobSubmitted { job_id, .. }
            | JobEvent::StateChanged { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::PriorityChanged { job_id, .. }
            | JobEvent::RetryScheduled { job_id, .. } => Some(job_id),
            JobEvent::PoolCapacityChanged { .. } | JobEvent::ConfigReloaded => None,
        }
    }
}

/// An event with its assigned sequence number.
///
/// Sequence numbers are strictly increasing across all events of one
/// orchestrator instance; subscribers use them to detect and recover
/// missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JobEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_strings() {
        let e = JobEvent::JobSubmitted {
            job_id: "j-1".to_string(),
            priority: Priority::P0,
        };
        assert_eq!(e.event_type(), "job_submitted");
        assert_eq!(e.job_id(), Some("j-1"));

        let e = JobEvent::PoolCapacityChanged {
            capacity: 2,
            previous: 4,
        };
        assert_eq!(e.event_type(), "pool_capacity_changed");
        assert_eq!(e.job_id(), None);
    }

    #[test]
    fn test_state_changed_serialization() {
        let e = JobEvent::StateChanged {
            job_id: "j-1".to_string(),
            from: JobStatus::Queued,
            to: JobStatus::Downloading,
            reason: None,
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains(r#""type":"state_changed""#));
        assert!(json.contains(r#""from":"queued""#));
        assert!(!json.contains("reason"));

        let back: JobEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_record_serialization_flattens_event() {
        let record = EventRecord {
            seq: 7,
            timestamp: Utc::now(),
            event: JobEvent::ConfigReloaded,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""seq":7"#));
        assert!(json.contains(r#""type":"config_reloaded""#));

        let back: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}

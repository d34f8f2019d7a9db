//! Durable event log storage.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::EventRecord;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Filter for querying the event log.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub job_id: Option<String>,
    pub event_type: Option<String>,
    pub since_seq: Option<u64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFilter {
    pub fn new() -> Self {
        Self {
            job_id: None,
            event_type: None,
            since_seq: None,
            from: None,
            to: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_since_seq(mut self, seq: u64) -> Self {
        self.since_seq = Some(seq);
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for event log storage.
///
/// The log backs historical queries; live replay is served from the
/// broadcaster's in-memory ring, never from here.
pub trait EventStore: Send + Sync {
    /// Insert a record under its already-assigned sequence number.
    fn insert(&self, record: &EventRecord) -> Result<(), EventStoreError>;

    /// Query records matching the filter, in sequence order.
    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventStoreError>;

    /// Count matching records.
    fn count(&self, filter: &EventFilter) -> Result<i64, EventStoreError>;
}

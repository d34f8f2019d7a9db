//! SQLite-backed event log.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{EventFilter, EventRecord, EventStore, EventStoreError, JobEvent};

/// SQLite-backed event store.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Create a new SQLite event store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, EventStoreError> {
        let conn = Connection::open(path).map_err(|e| EventStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite event store (useful for testing).
    pub fn in_memory() -> Result<Self, EventStoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| EventStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), EventStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                job_id TEXT,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_job_id ON events(job_id);
            CREATE INDEX IF NOT EXISTS idx_events_event_type ON events(event_type);
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            "#,
        )
        .map_err(|e| EventStoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn build_where_clause(filter: &EventFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref job_id) = filter.job_id {
            conditions.push("job_id = ?");
            params.push(Box::new(job_id.clone()));
        }

        if let Some(ref event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.clone()));
        }

        if let Some(since_seq) = filter.since_seq {
            conditions.push("seq > ?");
            params.push(Box::new(since_seq as i64));
        }

        if let Some(ref from) = filter.from {
            conditions.push("timestamp >= ?");
            params.push(Box::new(from.to_rfc3339()));
        }

        if let Some(ref to) = filter.to {
            conditions.push("timestamp <= ?");
            params.push(Box::new(to.to_rfc3339()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl EventStore for SqliteEventStore {
    fn insert(&self, record: &EventRecord) -> Result<(), EventStoreError> {
        let conn = self.conn.lock().unwrap();

        let data_json = serde_json::to_string(&record.event)
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO events (seq, timestamp, event_type, job_id, data) VALUES (?, ?, ?, ?, ?)",
            params![
                record.seq as i64,
                record.timestamp.to_rfc3339(),
                record.event.event_type(),
                record.event.job_id(),
                data_json,
            ],
        )
        .map_err(|e| EventStoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventStoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT seq, timestamp, data FROM events {} ORDER BY seq ASC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EventStoreError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let seq: i64 = row.get(0)?;
                let timestamp_str: String = row.get(1)?;
                let data_json: String = row.get(2)?;
                Ok((seq, timestamp_str, data_json))
            })
            .map_err(|e| EventStoreError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row_result in rows {
            let (seq, timestamp_str, data_json) =
                row_result.map_err(|e| EventStoreError::Database(e.to_string()))?;

            let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp_str)
                .map_err(|e| EventStoreError::Database(format!("Invalid timestamp: {}", e)))?
                .into();

            let event: JobEvent = serde_json::from_str(&data_json)
                .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

            records.push(EventRecord {
                seq: seq as u64,
                timestamp,
                event,
            });
        }

        Ok(records)
    }

    fn count(&self, filter: &EventFilter) -> Result<i64, EventStoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM events {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| EventStoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, Priority};

    fn create_test_store() -> SqliteEventStore {
        SqliteEventStore::in_memory().unwrap()
    }

    fn submitted_record(seq: u64, job_id: &str) -> EventRecord {
        EventRecord {
            seq,
            timestamp: Utc::now(),
            event: JobEvent::JobSubmitted {
                job_id: job_id.to_string(),
                priority: Priority::P1,
            },
        }
    }

    fn state_changed_record(seq: u64, job_id: &str) -> EventRecord {
        EventRecord {
            seq,
            timestamp: Utc::now(),
            event: JobEvent::StateChanged {
                job_id: job_id.to_string(),
                from: JobStatus::Queued,
                to: JobStatus::Downloading,
                reason: None,
            },
        }
    }

    #[test]
    fn test_insert_and_query() {
        let store = create_test_store();
        store.insert(&submitted_record(1, "j-1")).unwrap();

        let results = store.query(&EventFilter::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].seq, 1);
        assert_eq!(results[0].event.event_type(), "job_submitted");
    }

    #[test]
    fn test_default_filter_matches_new() {
        let store = create_test_store();
        store.insert(&submitted_record(1, "j-1")).unwrap();

        // Default must behave like new(), not a zero LIMIT.
        assert_eq!(EventFilter::default().limit, 100);
        let results = store.query(&EventFilter::default()).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_query_by_job_id() {
        let store = create_test_store();
        store.insert(&submitted_record(1, "j-1")).unwrap();
        store.insert(&submitted_record(2, "j-2")).unwrap();
        store.insert(&state_changed_record(3, "j-1")).unwrap();

        let results = store
            .query(&EventFilter::new().with_job_id("j-1"))
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_query_by_event_type() {
        let store = create_test_store();
        store.insert(&submitted_record(1, "j-1")).unwrap();
        store.insert(&state_changed_record(2, "j-1")).unwrap();

        let results = store
            .query(&EventFilter::new().with_event_type("state_changed"))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].seq, 2);
    }

    #[test]
    fn test_query_since_seq_in_order() {
        let store = create_test_store();
        for seq in 1..=5 {
            store.insert(&submitted_record(seq, "j-1")).unwrap();
        }

        let results = store
            .query(&EventFilter::new().with_since_seq(2))
            .unwrap();
        let seqs: Vec<u64> = results.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[test]
    fn test_count_with_filter() {
        let store = create_test_store();
        store.insert(&submitted_record(1, "j-1")).unwrap();
        store.insert(&state_changed_record(2, "j-1")).unwrap();
        store.insert(&state_changed_record(3, "j-2")).unwrap();

        assert_eq!(store.count(&EventFilter::new()).unwrap(), 3);
        assert_eq!(
            store
                .count(&EventFilter::new().with_event_type("state_changed"))
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("events.db");

        let store = SqliteEventStore::new(&db_path).unwrap();
        store.insert(&submitted_record(1, "j-1")).unwrap();

        assert!(db_path.exists());
        assert_eq!(store.query(&EventFilter::new()).unwrap().len(), 1);
    }
}

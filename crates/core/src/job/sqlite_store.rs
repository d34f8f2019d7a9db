//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{
    CreateJobRequest, DownloadJob, JobError, JobFilter, JobSort, JobStatus, JobStore, Priority,
    SortOrder, TrackRef, WorkerId,
};

const JOB_COLUMNS: &str = "id, track_ref, priority, status, progress_bytes, total_bytes, \
     retry_count, retry_floor, last_error, assigned_worker, created_at, updated_at";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                track_ref TEXT NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL,
                progress_bytes INTEGER NOT NULL DEFAULT 0,
                total_bytes INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                retry_floor INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                assigned_worker INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_dispatch ON jobs(priority, created_at, id);
            CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at);
            "#,
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        // Migration: add retry_floor column if it doesn't exist
        let _ = conn.execute(
            "ALTER TABLE jobs ADD COLUMN retry_floor INTEGER NOT NULL DEFAULT 0",
            [],
        );

        Ok(())
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(priority) = filter.priority {
            conditions.push("priority = ?");
            params.push(Box::new(priority.rank()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn order_clause(filter: &JobFilter) -> String {
        let dir = match filter.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        // Trailing keys keep the ordering total across equal keys;
        // priority listings stay FIFO within a tier.
        match filter.sort {
            JobSort::CreatedAt => format!("ORDER BY created_at {}, id ASC", dir),
            JobSort::UpdatedAt => format!("ORDER BY updated_at {}, id ASC", dir),
            JobSort::Priority => {
                format!("ORDER BY priority {}, created_at ASC, id ASC", dir)
            }
        }
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<DownloadJob> {
        let id: String = row.get(0)?;
        let track_ref: String = row.get(1)?;
        let priority_rank: u8 = row.get(2)?;
        let status_str: String = row.get(3)?;
        let progress_bytes: u64 = row.get(4)?;
        let total_bytes: u64 = row.get(5)?;
        let retry_count: u32 = row.get(6)?;
        let retry_floor: u32 = row.get::<_, Option<u32>>(7)?.unwrap_or(0);
        let last_error: Option<String> = row.get(8)?;
        let assigned_worker: Option<WorkerId> = row.get(9)?;
        let created_at_str: String = row.get(10)?;
        let updated_at_str: String = row.get(11)?;

        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(DownloadJob {
            id,
            track_ref: TrackRef::new(track_ref),
            priority: Priority::from_rank(priority_rank).unwrap_or(Priority::P2),
            status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Queued),
            progress_bytes,
            total_bytes,
            retry_count,
            retry_floor,
            last_error,
            assigned_worker,
            created_at,
            updated_at,
        })
    }

    fn get_locked(conn: &Connection, id: &str) -> Result<DownloadJob, JobError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
        match conn.query_row(&sql, params![id], Self::row_to_job) {
            Ok(job) => Ok(job),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(JobError::NotFound(id.to_string())),
            Err(e) => Err(JobError::Database(e.to_string())),
        }
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<DownloadJob, JobError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO jobs (id, track_ref, priority, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id,
                request.track_ref.as_str(),
                request.priority.rank(),
                JobStatus::Queued.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(DownloadJob {
            id,
            track_ref: request.track_ref,
            priority: request.priority,
            status: JobStatus::Queued,
            progress_bytes: 0,
            total_bytes: 0,
            retry_count: 0,
            retry_floor: 0,
            last_error: None,
            assigned_worker: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<DownloadJob>, JobError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);

        match conn.query_row(&sql, params![id], Self::row_to_job) {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(JobError::Database(e.to_string())),
        }
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<DownloadJob>, JobError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM jobs {} {} LIMIT ? OFFSET ?",
            JOB_COLUMNS,
            where_clause,
            Self::order_clause(filter),
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut jobs = Vec::new();
        for row_result in rows {
            jobs.push(row_result.map_err(|e| JobError::Database(e.to_string()))?);
        }

        Ok(jobs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| JobError::Database(e.to_string()))
    }

    fn transition(
        &self,
        id: &str,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<DownloadJob, JobError> {
        let conn = self.conn.lock().unwrap();
        let current = Self::get_locked(&conn, id)?;

        if !current.status.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                job_id: id.to_string(),
                from: current.status,
                to,
            });
        }

        let now = Utc::now();
        let last_error = if to == JobStatus::Downloading {
            None
        } else {
            error.or(current.last_error)
        };
        let assigned_worker = if current.status == JobStatus::Downloading {
            None
        } else {
            current.assigned_worker
        };

        conn.execute(
            "UPDATE jobs SET status = ?, last_error = ?, assigned_worker = ?, updated_at = ? \
             WHERE id = ?",
            params![
                to.as_str(),
                last_error,
                assigned_worker,
                now.to_rfc3339(),
                id
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(DownloadJob {
            status: to,
            last_error,
            assigned_worker,
            updated_at: now,
            ..current
        })
    }

    fn set_assigned_worker(
        &self,
        id: &str,
        worker: Option<WorkerId>,
    ) -> Result<DownloadJob, JobError> {
        let conn = self.conn.lock().unwrap();
        let current = Self::get_locked(&conn, id)?;

        let now = Utc::now();
        conn.execute(
            "UPDATE jobs SET assigned_worker = ?, updated_at = ? WHERE id = ?",
            params![worker, now.to_rfc3339(), id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(DownloadJob {
            assigned_worker: worker,
            updated_at: now,
            ..current
        })
    }

    fn set_priority(&self, id: &str, priority: Priority) -> Result<DownloadJob, JobError> {
        let conn = self.conn.lock().unwrap();
        let current = Self::get_locked(&conn, id)?;

        if current.status.is_terminal() {
            return Err(JobError::InvalidState {
                job_id: id.to_string(),
                current: current.status,
                operation: "set priority of".to_string(),
            });
        }

        let now = Utc::now();
        conn.execute(
            "UPDATE jobs SET priority = ?, updated_at = ? WHERE id = ?",
            params![priority.rank(), now.to_rfc3339(), id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(DownloadJob {
            priority,
            updated_at: now,
            ..current
        })
    }

    fn update_progress(
        &self,
        id: &str,
        progress_bytes: u64,
        total_bytes: u64,
    ) -> Result<DownloadJob, JobError> {
        let conn = self.conn.lock().unwrap();
        let current = Self::get_locked(&conn, id)?;

        // Progress never regresses within an attempt.
        let progress_bytes = progress_bytes.max(current.progress_bytes);
        let total_bytes = if total_bytes > 0 {
            total_bytes
        } else {
            current.total_bytes
        };

        let now = Utc::now();
        conn.execute(
            "UPDATE jobs SET progress_bytes = ?, total_bytes = ?, updated_at = ? WHERE id = ?",
            params![progress_bytes, total_bytes, now.to_rfc3339(), id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(DownloadJob {
            progress_bytes,
            total_bytes,
            updated_at: now,
            ..current
        })
    }

    fn reset_progress(&self, id: &str) -> Result<DownloadJob, JobError> {
        let conn = self.conn.lock().unwrap();
        let current = Self::get_locked(&conn, id)?;

        let now = Utc::now();
        conn.execute(
            "UPDATE jobs SET progress_bytes = 0, updated_at = ? WHERE id = ?",
            params![now.to_rfc3339(), id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(DownloadJob {
            progress_bytes: 0,
            updated_at: now,
            ..current
        })
    }

    fn increment_retry_count(&self, id: &str) -> Result<DownloadJob, JobError> {
        let conn = self.conn.lock().unwrap();
        let current = Self::get_locked(&conn, id)?;

        let new_retry_count = current.retry_count + 1;
        let now = Utc::now();

        conn.execute(
            "UPDATE jobs SET retry_count = ?, updated_at = ? WHERE id = ?",
            params![new_retry_count, now.to_rfc3339(), id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(DownloadJob {
            retry_count: new_retry_count,
            updated_at: now,
            ..current
        })
    }

    fn mark_manual_retry(&self, id: &str) -> Result<DownloadJob, JobError> {
        let conn = self.conn.lock().unwrap();
        let current = Self::get_locked(&conn, id)?;

        let now = Utc::now();
        conn.execute(
            "UPDATE jobs SET retry_floor = retry_count, updated_at = ? WHERE id = ?",
            params![now.to_rfc3339(), id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(DownloadJob {
            retry_floor: current.retry_count,
            updated_at: now,
            ..current
        })
    }

    fn delete(&self, id: &str) -> Result<DownloadJob, JobError> {
        let conn = self.conn.lock().unwrap();
        let job = Self::get_locked(&conn, id)?;

        conn.execute("DELETE FROM jobs WHERE id = ?", params![id])
            .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(job)
    }

    fn recover_in_flight(&self) -> Result<Vec<DownloadJob>, JobError> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT {} FROM jobs WHERE status = ? ORDER BY created_at ASC, id ASC",
            JOB_COLUMNS
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![JobStatus::Downloading.as_str()], Self::row_to_job)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut jobs = Vec::new();
        for row_result in rows {
            jobs.push(row_result.map_err(|e| JobError::Database(e.to_string()))?);
        }

        let now = Utc::now();
        conn.execute(
            "UPDATE jobs SET status = ?, assigned_worker = NULL, updated_at = ? WHERE status = ?",
            params![
                JobStatus::Queued.as_str(),
                now.to_rfc3339(),
                JobStatus::Downloading.as_str(),
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        for job in &mut jobs {
            job.status = JobStatus::Queued;
            job.assigned_worker = None;
            job.updated_at = now;
        }

        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SqliteJobStore {
        SqliteJobStore::in_memory().unwrap()
    }

    fn create_test_request() -> CreateJobRequest {
        CreateJobRequest {
            track_ref: TrackRef::new("peer@Music/Abbey Road/01 Come Together.flac"),
            priority: Priority::P1,
        }
    }

    #[test]
    fn test_create_job() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();

        assert!(!job.id.is_empty());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.priority, Priority::P1);
        assert_eq!(job.progress_bytes, 0);
        assert_eq!(job.retry_count, 0);
        assert!(job.assigned_worker.is_none());
    }

    #[test]
    fn test_get_job() {
        let store = create_test_store();
        let created = store.create(create_test_request()).unwrap();

        let fetched = store.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.track_ref, created.track_ref);
    }

    #[test]
    fn test_get_nonexistent_job() {
        let store = create_test_store();
        assert!(store.get("nonexistent-id").unwrap().is_none());
    }

    #[test]
    fn test_list_with_status_filter() {
        let store = create_test_store();

        store.create(create_test_request()).unwrap();
        let second = store.create(create_test_request()).unwrap();
        store
            .transition(&second.id, JobStatus::Cancelled, None)
            .unwrap();

        let queued = store
            .list(&JobFilter::new().with_status(JobStatus::Queued))
            .unwrap();
        assert_eq!(queued.len(), 1);

        let cancelled = store
            .list(&JobFilter::new().with_status(JobStatus::Cancelled))
            .unwrap();
        assert_eq!(cancelled.len(), 1);
    }

    #[test]
    fn test_list_with_priority_filter() {
        let store = create_test_store();

        let mut urgent = create_test_request();
        urgent.priority = Priority::P0;
        store.create(urgent).unwrap();
        store.create(create_test_request()).unwrap();

        let jobs = store
            .list(&JobFilter::new().with_priority(Priority::P0))
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].priority, Priority::P0);
    }

    #[test]
    fn test_list_pagination() {
        let store = create_test_store();
        for _ in 0..5 {
            store.create(create_test_request()).unwrap();
        }

        let page = store
            .list(&JobFilter::new().with_limit(2).with_offset(0))
            .unwrap();
        assert_eq!(page.len(), 2);

        let page = store
            .list(&JobFilter::new().with_limit(2).with_offset(4))
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_list_priority_sort() {
        let store = create_test_store();

        let mut low = create_test_request();
        low.priority = Priority::P2;
        store.create(low).unwrap();

        let mut high = create_test_request();
        high.priority = Priority::P0;
        store.create(high).unwrap();

        let jobs = store
            .list(&JobFilter::new().sorted_by(JobSort::Priority, SortOrder::Asc))
            .unwrap();
        assert_eq!(jobs[0].priority, Priority::P0);
        assert_eq!(jobs[1].priority, Priority::P2);
    }

    #[test]
    fn test_priority_sort_is_fifo_within_tier() {
        let store = create_test_store();

        let mut first = create_test_request();
        first.priority = Priority::P1;
        let first = store.create(first).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(2));
        let mut second = create_test_request();
        second.priority = Priority::P1;
        let second = store.create(second).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(2));
        let mut urgent = create_test_request();
        urgent.priority = Priority::P0;
        let urgent = store.create(urgent).unwrap();

        let jobs = store
            .list(&JobFilter::new().sorted_by(JobSort::Priority, SortOrder::Asc))
            .unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec![&urgent.id, &first.id, &second.id]);
    }

    #[test]
    fn test_count_with_filter() {
        let store = create_test_store();
        store.create(create_test_request()).unwrap();
        let second = store.create(create_test_request()).unwrap();
        store
            .transition(&second.id, JobStatus::Cancelled, None)
            .unwrap();

        let count = store
            .count(&JobFilter::new().with_status(JobStatus::Queued))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_legal_transition() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();

        let updated = store
            .transition(&job.id, JobStatus::Downloading, None)
            .unwrap();
        assert_eq!(updated.status, JobStatus::Downloading);

        let fetched = store.get(&job.id).unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Downloading);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();

        let result = store.transition(&job.id, JobStatus::Completed, None);
        assert!(matches!(
            result,
            Err(JobError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Completed,
                ..
            })
        ));

        // State unchanged after the rejection.
        let fetched = store.get(&job.id).unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Queued);
    }

    #[test]
    fn test_transition_nonexistent_job() {
        let store = create_test_store();
        let result = store.transition("nonexistent-id", JobStatus::Cancelled, None);
        assert!(matches!(result, Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_transition_to_failed_records_error() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();
        store
            .transition(&job.id, JobStatus::Downloading, None)
            .unwrap();

        let failed = store
            .transition(
                &job.id,
                JobStatus::Failed,
                Some("peer unavailable".to_string()),
            )
            .unwrap();
        assert_eq!(failed.last_error.as_deref(), Some("peer unavailable"));
    }

    #[test]
    fn test_entering_downloading_clears_error() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();
        store
            .transition(&job.id, JobStatus::Downloading, None)
            .unwrap();
        store
            .transition(&job.id, JobStatus::Failed, Some("timeout".to_string()))
            .unwrap();
        store.transition(&job.id, JobStatus::Queued, None).unwrap();

        let restarted = store
            .transition(&job.id, JobStatus::Downloading, None)
            .unwrap();
        assert!(restarted.last_error.is_none());
    }

    #[test]
    fn test_leaving_downloading_clears_worker() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();
        store
            .transition(&job.id, JobStatus::Downloading, None)
            .unwrap();
        store.set_assigned_worker(&job.id, Some(3)).unwrap();

        let done = store
            .transition(&job.id, JobStatus::Completed, None)
            .unwrap();
        assert!(done.assigned_worker.is_none());
    }

    #[test]
    fn test_set_priority() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();

        let updated = store.set_priority(&job.id, Priority::P0).unwrap();
        assert_eq!(updated.priority, Priority::P0);
    }

    #[test]
    fn test_set_priority_on_terminal_job_rejected() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();
        store
            .transition(&job.id, JobStatus::Cancelled, None)
            .unwrap();

        let result = store.set_priority(&job.id, Priority::P0);
        assert!(matches!(result, Err(JobError::InvalidState { .. })));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();
        store
            .transition(&job.id, JobStatus::Downloading, None)
            .unwrap();

        store.update_progress(&job.id, 500, 1000).unwrap();
        let regressed = store.update_progress(&job.id, 100, 1000).unwrap();
        assert_eq!(regressed.progress_bytes, 500);

        let advanced = store.update_progress(&job.id, 900, 1000).unwrap();
        assert_eq!(advanced.progress_bytes, 900);
    }

    #[test]
    fn test_reset_progress() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();
        store
            .transition(&job.id, JobStatus::Downloading, None)
            .unwrap();
        store.update_progress(&job.id, 500, 1000).unwrap();

        let reset = store.reset_progress(&job.id).unwrap();
        assert_eq!(reset.progress_bytes, 0);
        assert_eq!(reset.total_bytes, 1000);
    }

    #[test]
    fn test_increment_retry_count() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();

        let once = store.increment_retry_count(&job.id).unwrap();
        assert_eq!(once.retry_count, 1);
        let twice = store.increment_retry_count(&job.id).unwrap();
        assert_eq!(twice.retry_count, 2);
    }

    #[test]
    fn test_mark_manual_retry_keeps_count() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();
        store.increment_retry_count(&job.id).unwrap();
        store.increment_retry_count(&job.id).unwrap();
        store.increment_retry_count(&job.id).unwrap();

        let marked = store.mark_manual_retry(&job.id).unwrap();
        assert_eq!(marked.retry_count, 3);
        assert_eq!(marked.retry_floor, 3);
        assert_eq!(marked.attempts_since_retry(), 0);
    }

    #[test]
    fn test_delete_job() {
        let store = create_test_store();
        let job = store.create(create_test_request()).unwrap();

        let deleted = store.delete(&job.id).unwrap();
        assert_eq!(deleted.id, job.id);
        assert!(store.get(&job.id).unwrap().is_none());

        let result = store.delete(&job.id);
        assert!(matches!(result, Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_recover_in_flight() {
        let store = create_test_store();

        let orphaned = store.create(create_test_request()).unwrap();
        store
            .transition(&orphaned.id, JobStatus::Downloading, None)
            .unwrap();
        store.set_assigned_worker(&orphaned.id, Some(1)).unwrap();

        let untouched = store.create(create_test_request()).unwrap();

        let recovered = store.recover_in_flight().unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].id, orphaned.id);
        assert_eq!(recovered[0].status, JobStatus::Queued);
        assert!(recovered[0].assigned_worker.is_none());

        let fetched = store.get(&orphaned.id).unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Queued);
        assert!(fetched.assigned_worker.is_none());

        let other = store.get(&untouched.id).unwrap().unwrap();
        assert_eq!(other.status, JobStatus::Queued);

        // Nothing left to recover on a second pass.
        assert!(store.recover_in_flight().unwrap().is_empty());
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("jobs.db");

        let store = SqliteJobStore::new(&db_path).unwrap();
        let job = store.create(create_test_request()).unwrap();

        assert!(db_path.exists());
        assert!(store.get(&job.id).unwrap().is_some());
    }
}

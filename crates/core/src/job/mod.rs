//! Download jobs: the durable record of every requested transfer.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{
    CreateJobRequest, JobError, JobFilter, JobSort, JobStore, SortOrder,
};
pub use types::{DownloadJob, JobStatus, Priority, TrackRef, WorkerId};

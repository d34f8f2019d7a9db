pub mod config;
pub mod events;
pub mod job;
pub mod orchestrator;
pub mod retry;
pub mod testing;
pub mod transfer;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use events::{EventBroadcaster, EventRecord, JobEvent};
pub use job::{DownloadJob, JobFilter, JobStatus, JobStore, Priority, SqliteJobStore, TrackRef};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorHandle};
pub use retry::{RetryDecision, RetryPolicy};
pub use transfer::{SlskdClient, TransferClient, TransferError};

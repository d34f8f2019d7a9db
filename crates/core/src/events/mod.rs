//! Event broadcasting and the durable event log.

mod broadcaster;
mod sqlite;
mod store;
mod types;
mod writer;

pub use broadcaster::{EventBroadcaster, EventError, Subscription};
pub use sqlite::SqliteEventStore;
pub use store::{EventFilter, EventStore, EventStoreError};
pub use types::{EventRecord, JobEvent};
pub use writer::{create_event_log, EventWriter};

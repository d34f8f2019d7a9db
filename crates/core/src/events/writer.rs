//! Background task persisting published events to the event log.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{EventRecord, EventStore};

/// Receives published events and writes them to storage.
pub struct EventWriter {
    rx: mpsc::Receiver<EventRecord>,
    store: Arc<dyn EventStore>,
}

impl EventWriter {
    pub fn new(rx: mpsc::Receiver<EventRecord>, store: Arc<dyn EventStore>) -> Self {
        Self { rx, store }
    }

    /// Run the writer, consuming records until the channel is closed.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        tracing::info!("Event writer started");

        while let Some(record) = self.rx.recv().await {
            if let Err(e) = self.store.insert(&record) {
                tracing::error!("Failed to write event {}: {}", record.seq, e);
            }
        }

        tracing::info!("Event writer shutting down");
    }
}

/// Create the persistence side of the event system.
///
/// Returns the sender to hand to `EventBroadcaster::with_persistence`
/// and the writer to spawn with `tokio::spawn(writer.run())`.
pub fn create_event_log(
    store: Arc<dyn EventStore>,
    buffer_size: usize,
) -> (mpsc::Sender<EventRecord>, EventWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let writer = EventWriter::new(rx, store);
    (tx, writer)
}

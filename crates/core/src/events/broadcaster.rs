//! Event fan-out with bounded replay.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use super::{EventRecord, JobEvent};

/// Errors returned when subscribing to the event stream.
#[derive(Debug, Error)]
pub enum EventError {
    /// The requested sequence is older than the replay window.
    ///
    /// The subscriber should re-baseline from the job store and
    /// resubscribe from `oldest_available - 1`.
    #[error("Events since {requested} are gone; oldest available is {oldest_available}")]
    ReplayGap {
        requested: u64,
        oldest_available: u64,
    },
}

/// A live event subscription: events missed since a known sequence
/// number, followed by a live stream.
pub struct Subscription {
    /// Events published after the requested sequence, in order.
    pub replay: Vec<EventRecord>,
    /// Live receiver; picks up exactly where `replay` ends.
    pub live: broadcast::Receiver<EventRecord>,
}

struct Ring {
    next_seq: u64,
    buffer: VecDeque<EventRecord>,
    capacity: usize,
}

/// Fans out orchestrator events to any number of subscribers.
///
/// Publishing is non-blocking: live delivery goes through a broadcast
/// channel where a lagging subscriber loses events instead of delaying
/// the publisher, and a bounded ring keeps the recent history for
/// replay-on-reconnect. An optional persistence channel feeds the
/// durable event log without sitting on the publish path.
pub struct EventBroadcaster {
    ring: Mutex<Ring>,
    live: broadcast::Sender<EventRecord>,
    persist: Option<mpsc::Sender<EventRecord>>,
}

impl EventBroadcaster {
    /// Create a broadcaster keeping `replay_capacity` events for replay.
    pub fn new(replay_capacity: usize) -> Self {
        let (live, _) = broadcast::channel(replay_capacity.max(16));
        Self {
            ring: Mutex::new(Ring {
                next_seq: 1,
                buffer: VecDeque::with_capacity(replay_capacity),
                capacity: replay_capacity,
            }),
            live,
            persist: None,
        }
    }

    /// Attach a persistence channel; every published record is also
    /// offered to it (dropped with a log line if the writer lags).
    pub fn with_persistence(mut self, tx: mpsc::Sender<EventRecord>) -> Self {
        self.persist = Some(tx);
        self
    }

    /// Publish an event, assigning it the next sequence number.
    ///
    /// The ring insert and the live send happen under the same lock as
    /// `subscribe` takes its snapshot, so a concurrent subscriber sees
    /// each event exactly once: either in replay or on the live stream,
    /// never both. Both sends are non-blocking.
    pub fn publish(&self, event: JobEvent) -> u64 {
        let mut ring = self.ring.lock().unwrap();
        let record = EventRecord {
            seq: ring.next_seq,
            timestamp: Utc::now(),
            event,
        };
        ring.next_seq += 1;
        if ring.capacity > 0 {
            if ring.buffer.len() == ring.capacity {
                ring.buffer.pop_front();
            }
            ring.buffer.push_back(record.clone());
        }

        let seq = record.seq;

        if let Some(tx) = &self.persist {
            if let Err(e) = tx.try_send(record.clone()) {
                tracing::error!("Failed to persist event {}: {}", seq, e);
            }
        }

        // No receivers is fine.
        let _ = self.live.send(record);

        seq
    }

    /// Sequence number of the most recently published event (0 if none).
    pub fn last_seq(&self) -> u64 {
        self.ring.lock().unwrap().next_seq - 1
    }

    /// Subscribe to the event stream.
    ///
    /// With `since = Some(n)` the subscription replays every event after
    /// sequence `n`; with `None` it starts from now. The replay snapshot
    /// and the live receiver are taken under the same lock, so no event
    /// is missed or duplicated between them.
    pub fn subscribe(&self, since: Option<u64>) -> Result<Subscription, EventError> {
        let ring = self.ring.lock().unwrap();
        let live = self.live.subscribe();

        let replay = match since {
            None => Vec::new(),
            Some(since) => {
                let last = ring.next_seq - 1;
                if since >= last {
                    Vec::new()
                } else {
                    let oldest_buffered = ring.buffer.front().map(|r| r.seq).unwrap_or(u64::MAX);
                    if since + 1 < oldest_buffered {
                        return Err(EventError::ReplayGap {
                            requested: since,
                            oldest_available: oldest_buffered.min(last + 1),
                        });
                    }
                    ring.buffer
                        .iter()
                        .filter(|r| r.seq > since)
                        .cloned()
                        .collect()
                }
            }
        };

        Ok(Subscription { replay, live })
    }
}

//! Per-message multi-subscriber event stream with replay for late joiners.
//!
//! Each stream is `(replay_buffer, terminal_latch, subscriber_set)` guarded
//! by a per-stream mutex. `publish` appends then forwards to all
//! subscribers; on a terminal event it latches and drops every subscriber
//! sender, which closes their channels once already-buffered events drain.
//! A new subscriber takes the mutex, clones the replay buffer, registers a
//! channel (unless already terminal), and releases — so it can never miss
//! an event between snapshotting and registering.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One event in a message's stream, matching the named event catalogue
/// adapters translate onto the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Waiting { position: usize },
    Started,
    Chunk { index: usize, text: String },
    Done { result: String, completed_at: DateTime<Utc> },
    Error { message: String, completed_at: DateTime<Utc> },
    Cancelled { completed_at: DateTime<Utc> },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Done { .. } | StreamEvent::Error { .. } | StreamEvent::Cancelled { .. }
        )
    }
}

/// What a caller gets back from [`StreamBroadcaster::subscribe`]: the
/// replay snapshot to deliver first, then live events off `receiver`.
#[derive(Debug)]
pub struct Subscription {
    pub replay: Vec<StreamEvent>,
    pub receiver: mpsc::Receiver<StreamEvent>,
    /// True if the stream had already latched terminal at subscribe time —
    /// `receiver` will simply be closed with nothing further to deliver.
    pub already_terminal: bool,
}

struct StreamState {
    replay: Vec<StreamEvent>,
    terminal: bool,
    subscribers: Vec<mpsc::Sender<StreamEvent>>,
}

impl StreamState {
    fn new() -> Self {
        StreamState {
            replay: Vec::new(),
            terminal: false,
            subscribers: Vec::new(),
        }
    }
}

/// Owns one stream per message id. Streams are never removed — a
/// terminated stream remains queryable for the lifetime of the process.
#[derive(Debug)]
pub struct StreamBroadcaster {
    streams: DashMap<Uuid, Mutex<StreamState>>,
    subscriber_channel_capacity: usize,
}

impl StreamBroadcaster {
    pub fn new(subscriber_channel_capacity: usize) -> Self {
        StreamBroadcaster {
            streams: DashMap::new(),
            subscriber_channel_capacity: subscriber_channel_capacity.max(1),
        }
    }

    /// Create the stream for `id` if it does not already exist. Idempotent.
    pub fn create(&self, id: Uuid) {
        self.streams
            .entry(id)
            .or_insert_with(|| Mutex::new(StreamState::new()));
    }

    /// Append `event` to `id`'s replay buffer and forward it to every live
    /// subscriber. No-op (besides a debug log) if the stream was already
    /// terminal or does not exist.
    ///
    /// A subscriber whose bounded channel is full is dropped from the
    /// subscriber set rather than blocking the publisher — backpressure is
    /// local to that subscriber, never global.
    pub fn publish(&self, id: Uuid, event: StreamEvent) {
        let Some(entry) = self.streams.get(&id) else {
            tracing::debug!(message_id = %id, "publish on unknown stream, ignoring");
            return;
        };
        let mut state = entry.lock();
        if state.terminal {
            tracing::debug!(message_id = %id, "publish after terminal latch, ignoring");
            return;
        }

        let is_terminal = event.is_terminal();
        state.replay.push(event.clone());

        let subscribers = std::mem::take(&mut state.subscribers);
        let mut keep = Vec::with_capacity(subscribers.len());
        for tx in subscribers {
            match tx.try_send(event.clone()) {
                Ok(()) => keep.push(tx),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(message_id = %id, "subscriber overrun, disconnecting");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        state.subscribers = keep;

        if is_terminal {
            state.terminal = true;
            // Dropping the remaining senders closes each receiver once its
            // buffered events (including this one) have been read.
            state.subscribers.clear();
        }
    }

    /// Subscribe to `id`'s stream. Returns `None` if `create` was never
    /// called for this id.
    pub fn subscribe(&self, id: Uuid) -> Option<Subscription> {
        let entry = self.streams.get(&id)?;
        let mut state = entry.lock();
        let (tx, rx) = mpsc::channel(self.subscriber_channel_capacity);
        let replay = state.replay.clone();
        let already_terminal = state.terminal;
        if !already_terminal {
            state.subscribers.push(tx);
        }
        // `tx` is dropped immediately when already_terminal, which is fine:
        // the receiver sees a closed channel with nothing buffered, and the
        // caller is expected to deliver `replay` (which already ends in the
        // terminal event) before treating the stream as finished.
        Some(Subscription {
            replay,
            receiver: rx,
            already_terminal,
        })
    }

    /// Number of live subscribers on `id`'s stream, for diagnostics/tests.
    /// There is no explicit `unsubscribe` call: a subscriber disconnects by
    /// dropping its `Receiver`, after which the next `publish` observes a
    /// closed channel and drops that sender from the subscriber set.
    pub fn subscriber_count(&self, id: Uuid) -> usize {
        self.streams
            .get(&id)
            .map(|entry| entry.lock().subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid() -> Uuid {
        Uuid::from_bytes([7; 16])
    }

    #[tokio::test]
    async fn late_subscriber_replays_full_history_then_terminal() {
        let bc = StreamBroadcaster::new(16);
        let id = uuid();
        bc.create(id);
        bc.publish(id, StreamEvent::Started);
        bc.publish(
            id,
            StreamEvent::Chunk {
                index: 0,
                text: "The ".into(),
            },
        );
        bc.publish(
            id,
            StreamEvent::Chunk {
                index: 1,
                text: "answer ".into(),
            },
        );
        bc.publish(
            id,
            StreamEvent::Chunk {
                index: 2,
                text: "is 42.".into(),
            },
        );
        bc.publish(
            id,
            StreamEvent::Done {
                result: "The answer is 42.".into(),
                completed_at: Utc::now(),
            },
        );

        let mut sub = bc.subscribe(id).expect("stream exists");
        assert!(sub.already_terminal);
        assert_eq!(sub.replay.len(), 5);
        assert!(matches!(sub.replay.last(), Some(StreamEvent::Done { .. })));
        assert_eq!(sub.receiver.recv().await, None);
    }

    #[tokio::test]
    async fn live_subscriber_receives_events_in_order() {
        let bc = StreamBroadcaster::new(16);
        let id = uuid();
        bc.create(id);
        let mut sub = bc.subscribe(id).expect("stream exists");

        bc.publish(id, StreamEvent::Started);
        bc.publish(
            id,
            StreamEvent::Chunk {
                index: 0,
                text: "hi".into(),
            },
        );
        bc.publish(
            id,
            StreamEvent::Done {
                result: "hi".into(),
                completed_at: Utc::now(),
            },
        );

        assert_eq!(sub.receiver.recv().await, Some(StreamEvent::Started));
        assert_eq!(
            sub.receiver.recv().await,
            Some(StreamEvent::Chunk {
                index: 0,
                text: "hi".into()
            })
        );
        assert!(matches!(
            sub.receiver.recv().await,
            Some(StreamEvent::Done { .. })
        ));
        assert_eq!(sub.receiver.recv().await, None);
    }

    #[tokio::test]
    async fn publish_after_terminal_is_ignored() {
        let bc = StreamBroadcaster::new(16);
        let id = uuid();
        bc.create(id);
        bc.publish(
            id,
            StreamEvent::Cancelled {
                completed_at: Utc::now(),
            },
        );
        bc.publish(id, StreamEvent::Started);

        let sub = bc.subscribe(id).unwrap();
        assert_eq!(sub.replay.len(), 1);
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_without_blocking_others() {
        let bc = StreamBroadcaster::new(1);
        let id = uuid();
        bc.create(id);
        let slow = bc.subscribe(id).unwrap();
        let mut fast = bc.subscribe(id).unwrap();

        // Fill the slow subscriber's single-slot buffer; `fast` drains its
        // own slot between publishes so only `slow` ever overruns.
        bc.publish(
            id,
            StreamEvent::Chunk {
                index: 0,
                text: "a".into(),
            },
        );
        assert_eq!(
            fast.receiver.recv().await,
            Some(StreamEvent::Chunk {
                index: 0,
                text: "a".into()
            })
        );

        bc.publish(
            id,
            StreamEvent::Chunk {
                index: 1,
                text: "b".into(),
            },
        );

        assert_eq!(bc.subscriber_count(id), 1);
        assert_eq!(
            fast.receiver.recv().await,
            Some(StreamEvent::Chunk {
                index: 1,
                text: "b".into()
            })
        );
        drop(slow);
    }
}

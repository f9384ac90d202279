//! The `Engine`: the owning value that wires together the store, scheduler,
//! broadcaster and dispatch worker, and exposes the read-only query surface
//! adapters build their responses from.
//!
//! Adapters construct exactly one `Engine` at startup
//! (`Engine::new(config, responder)`), call its write operations
//! (`submit`/`cancel`) and read operations (`get`/`summary`/`threads`/...)
//! directly, and call [`Engine::shutdown`] to drain on exit. There is no
//! process-wide singleton; every test spins up its own `Engine`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use broker_shared::{BrokerConfig, BrokerError, BrokerResult, Message, MessageState, Priority, ThreadMetadata};

use crate::broadcaster::{StreamBroadcaster, StreamEvent, Subscription};
use crate::dispatch::DispatchWorker;
use crate::responder::Responder;
use crate::scheduler::PriorityScheduler;
use crate::store::MessageStore;

/// A message together with its current position in the scheduler, if any.
/// `queue_position` is `Some` iff the message is still QUEUED.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub message: Message,
    pub queue_position: Option<usize>,
}

/// One entry in [`QueueSummary::queued_preview`].
#[derive(Debug, Clone)]
pub struct QueuedPreview {
    pub id: Uuid,
    pub priority: Priority,
    pub preview: String,
    pub position: usize,
}

/// Response shape for the `summary()` read path.
#[derive(Debug, Clone)]
pub struct QueueSummary {
    pub count_by_state: HashMap<MessageState, usize>,
    pub queued_preview: Vec<QueuedPreview>,
    pub processing: Option<Message>,
}

/// Result of a successful [`Engine::submit`].
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub message: Message,
    pub queue_position: Option<usize>,
}

/// How many queued entries `summary()` previews at most, keeping the
/// response small regardless of queue depth.
const QUEUE_PREVIEW_LIMIT: usize = 20;

/// The engine: store + scheduler + broadcaster + the one dispatch worker
/// task that consumes from the scheduler.
pub struct Engine {
    store: Arc<MessageStore>,
    scheduler: Arc<PriorityScheduler>,
    broadcaster: Arc<StreamBroadcaster>,
    shutdown: CancellationToken,
    config: BrokerConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("max_queue_size", &self.config.max_queue_size)
            .field("queued", &self.scheduler.len())
            .finish()
    }
}

impl Engine {
    /// Build a new engine and spawn its dispatch worker. Returns the engine
    /// handle plus the worker's `JoinHandle`, which [`Engine::shutdown`]
    /// awaits to drain.
    pub fn new(config: BrokerConfig, responder: Arc<dyn Responder>) -> (Arc<Self>, JoinHandle<()>) {
        let store = Arc::new(MessageStore::new(config.max_queue_size));
        let scheduler = Arc::new(PriorityScheduler::new());
        let broadcaster = Arc::new(StreamBroadcaster::new(config.subscriber_channel_capacity));
        let shutdown = CancellationToken::new();

        let worker = DispatchWorker::new(
            store.clone(),
            scheduler.clone(),
            broadcaster.clone(),
            responder,
            config.processing_timeout(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(worker.run());

        let engine = Arc::new(Engine {
            store,
            scheduler,
            broadcaster,
            shutdown,
            config,
        });
        (engine, handle)
    }

    /// Admit a prompt. Creates the message, enqueues it in the scheduler,
    /// and creates its stream, in that order — a subscriber racing the
    /// response can always find a stream to attach to.
    #[tracing::instrument(skip(self, user_message))]
    pub fn submit(
        &self,
        user_message: String,
        priority: Priority,
        thread_id: Option<String>,
    ) -> BrokerResult<SubmitOutcome> {
        let message = self.store.submit(user_message, priority, thread_id)?;
        self.broadcaster.create(message.id);
        self.scheduler.enqueue(message.id, message.priority, message.sequence);
        let queue_position = self.queue_position(message.id);
        Ok(SubmitOutcome { message, queue_position })
    }

    pub fn get(&self, id: Uuid) -> BrokerResult<MessageView> {
        let message = self.store.get(id)?;
        let queue_position = (message.state == MessageState::Queued)
            .then(|| self.queue_position(id))
            .flatten();
        Ok(MessageView { message, queue_position })
    }

    /// Cancel a QUEUED message: flips its state, withdraws it from the
    /// scheduler (best-effort — the dispatch worker re-checks state on
    /// dequeue regardless), and publishes the terminal `cancelled` event.
    pub fn cancel(&self, id: Uuid) -> BrokerResult<Message> {
        let message = self.store.cancel(id)?;
        self.scheduler.withdraw(id);
        self.broadcaster.publish(
            id,
            StreamEvent::Cancelled {
                completed_at: message.completed_at.expect("set on cancellation"),
            },
        );
        Ok(message)
    }

    /// Subscribe to `id`'s event stream. Fails with
    /// [`BrokerError::MessageNotFound`] if `id` was never submitted.
    pub fn subscribe(&self, id: Uuid) -> BrokerResult<Subscription> {
        self.store.get(id)?;
        self.broadcaster
            .subscribe(id)
            .ok_or(BrokerError::MessageNotFound(id))
    }

    pub fn summary(&self) -> QueueSummary {
        let count_by_state = self.store.counts_by_state();
        let ordered = self.scheduler.ordered_ids();
        let queued_preview = ordered
            .iter()
            .take(QUEUE_PREVIEW_LIMIT)
            .enumerate()
            .filter_map(|(position, id)| {
                self.store.get(*id).ok().map(|m| QueuedPreview {
                    id: m.id,
                    priority: m.priority,
                    preview: m.preview(),
                    position,
                })
            })
            .collect();
        let processing = self.store.processing_message();
        QueueSummary {
            count_by_state,
            queued_preview,
            processing,
        }
    }

    /// Thread summaries sorted by `last_activity` descending.
    pub fn threads(&self) -> Vec<ThreadMetadata> {
        let mut threads = self.store.all_thread_metadata();
        threads.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        threads
    }

    pub fn thread_metadata(&self, thread_id: &str) -> BrokerResult<ThreadMetadata> {
        self.store.thread_metadata(thread_id)
    }

    pub fn thread_messages(&self, thread_id: &str) -> BrokerResult<Vec<Message>> {
        self.store.thread_messages(thread_id)
    }

    /// Current position of `id` in dispatch order, or `None` if it is not
    /// (or no longer) queued.
    fn queue_position(&self, id: Uuid) -> Option<usize> {
        self.scheduler.ordered_ids().iter().position(|&x| x == id)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Trip the shutdown signal and wait for the dispatch worker to exit.
    pub async fn shutdown(&self, worker_handle: JoinHandle<()>) {
        self.shutdown.cancel();
        if let Err(err) = worker_handle.await {
            tracing::error!(%err, "dispatch worker task panicked during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use broker_shared::Priority;

    use super::*;
    use crate::responder::{EchoResponder, ScriptedResponder};

    fn config() -> BrokerConfig {
        BrokerConfig {
            max_queue_size: 100,
            processing_timeout_secs: 5,
            ..BrokerConfig::default()
        }
    }

    #[tokio::test]
    async fn submit_then_get_reports_queue_position() {
        let (engine, handle) = Engine::new(
            config(),
            Arc::new(ScriptedResponder::new(Vec::<String>::new()).with_pre_delay(Duration::from_secs(5))),
        );

        let a = engine
            .submit("a".to_string(), Priority::Normal, None)
            .unwrap();
        let b = engine
            .submit("b".to_string(), Priority::Normal, None)
            .unwrap();

        // `a` may already be dispatched (picked up by the worker) by the
        // time we read `b`; `b` is guaranteed to still be behind it.
        let view_b = engine.get(b.message.id).unwrap();
        assert_eq!(view_b.message.state, MessageState::Queued);
        assert!(view_b.queue_position.is_some());
        assert!(a.queue_position.is_none() || a.queue_position == Some(0));

        engine.shutdown(handle).await;
    }

    #[tokio::test]
    async fn cancel_queued_then_dispatch_next_s3() {
        let (engine, handle) = Engine::new(config(), Arc::new(EchoResponder::default()));

        let a = engine.submit("a".to_string(), Priority::Normal, None).unwrap();
        let b = engine.submit("b".to_string(), Priority::Normal, None).unwrap();
        engine.cancel(b.message.id).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let view = engine.get(a.message.id).unwrap();
            if view.message.state.is_terminal() {
                assert_eq!(view.message.state, MessageState::Completed);
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("a never completed");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let summary = engine.summary();
        assert_eq!(summary.count_by_state[&MessageState::Completed], 1);
        assert_eq!(summary.count_by_state[&MessageState::Cancelled], 1);
        assert_eq!(summary.count_by_state[&MessageState::Queued], 0);
        assert_eq!(summary.count_by_state[&MessageState::Processing], 0);

        let b_view = engine.get(b.message.id).unwrap();
        assert!(b_view.message.started_at.is_none());

        engine.shutdown(handle).await;
    }

    #[tokio::test]
    async fn thread_history_s5() {
        let (engine, handle) = Engine::new(config(), Arc::new(EchoResponder::default()));

        let a = engine
            .submit("q1".to_string(), Priority::Normal, Some("t".into()))
            .unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if engine.get(a.message.id).unwrap().message.state.is_terminal() {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("a never completed");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let b = engine
            .submit("q2".to_string(), Priority::Normal, Some("t".into()))
            .unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if engine.get(b.message.id).unwrap().message.state.is_terminal() {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("b never completed");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let messages = engine.thread_messages("t").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, a.message.id);
        assert_eq!(messages[1].id, b.message.id);

        let meta = engine.thread_metadata("t").unwrap();
        assert_eq!(meta.message_count, 2);
        assert_eq!(meta.states[&MessageState::Completed], 2);
        assert_eq!(meta.last_message_preview.as_deref(), Some("q2"));

        engine.shutdown(handle).await;
    }
}

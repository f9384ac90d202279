//! Authoritative message table, thread index, and the state-transition
//! gatekeeper.
//!
//! One [`parking_lot::RwLock`] guards the messages, thread index and thread
//! metadata together, matching the "single write lock" policy in §5: the
//! dispatch worker and `submit`/`cancel` take the write guard; everything
//! else (status, summary, thread reads) takes the read guard or a clone of
//! the write guard's snapshot.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use broker_shared::message::{truncate_preview, MAX_THREAD_ID_LEN};
use broker_shared::{BrokerError, BrokerResult, Message, MessageState, Priority, ThreadMetadata};

/// Optional fields a transition may carry.
///
/// Chunk appends are handled separately by [`MessageStore::append_chunk`]:
/// appending text does not change `state`, and the transition graph in
/// `broker_shared::message` has no self-loop for `Processing -> Processing`.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    pub result: Option<String>,
    pub error: Option<String>,
}

impl TransitionUpdate {
    pub fn result(text: impl Into<String>) -> Self {
        TransitionUpdate {
            result: Some(text.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        TransitionUpdate {
            result: None,
            error: Some(message.into()),
        }
    }
}

struct Inner {
    messages: HashMap<Uuid, Message>,
    /// Insertion order == `created_at` ascending, since ids are appended
    /// exactly once, at submit time, in submit order.
    thread_index: HashMap<String, Vec<Uuid>>,
    thread_meta: HashMap<String, ThreadMetadata>,
    queued_count: usize,
    next_sequence: u64,
}

/// The message store and its derived thread index.
#[derive(Debug)]
pub struct MessageStore {
    inner: RwLock<Inner>,
    max_queue_size: usize,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("messages", &self.messages.len())
            .field("threads", &self.thread_meta.len())
            .field("queued_count", &self.queued_count)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

impl MessageStore {
    pub fn new(max_queue_size: usize) -> Self {
        MessageStore {
            inner: RwLock::new(Inner {
                messages: HashMap::new(),
                thread_index: HashMap::new(),
                thread_meta: HashMap::new(),
                queued_count: 0,
                next_sequence: 0,
            }),
            max_queue_size,
        }
    }

    /// Admit a new message. Fails with [`BrokerError::InvalidInput`] on an
    /// empty prompt or an oversize `thread_id`, or [`BrokerError::QueueFull`]
    /// once `max_queue_size` QUEUED messages are already admitted.
    #[tracing::instrument(skip(self, user_message), fields(thread_id = thread_id.as_deref()))]
    pub fn submit(
        &self,
        user_message: String,
        priority: Priority,
        thread_id: Option<String>,
    ) -> BrokerResult<Message> {
        if user_message.trim().is_empty() {
            return Err(BrokerError::InvalidInput(
                "user_message must not be empty".to_string(),
            ));
        }
        if let Some(tid) = &thread_id {
            if tid.len() > MAX_THREAD_ID_LEN {
                return Err(BrokerError::InvalidInput(format!(
                    "thread_id must be at most {MAX_THREAD_ID_LEN} bytes"
                )));
            }
            if tid.is_empty() {
                return Err(BrokerError::InvalidInput(
                    "thread_id must not be empty".to_string(),
                ));
            }
        }

        let mut inner = self.inner.write();
        if inner.queued_count >= self.max_queue_size {
            return Err(BrokerError::QueueFull);
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        let message = Message::new(id, user_message, priority, thread_id.clone(), sequence, now);
        inner.messages.insert(id, message.clone());
        inner.queued_count += 1;

        if let Some(tid) = thread_id {
            let preview = truncate_preview(&message.user_message);
            let meta = inner
                .thread_meta
                .entry(tid.clone())
                .or_insert_with(|| ThreadMetadata::new(tid.clone(), now));
            meta.message_count += 1;
            *meta.states.entry(MessageState::Queued).or_insert(0) += 1;
            meta.last_activity = now;
            meta.last_message_preview = Some(preview);
            inner.thread_index.entry(tid).or_default().push(id);
        }

        tracing::debug!(message_id = %id, sequence, "message admitted");
        Ok(message)
    }

    pub fn get(&self, id: Uuid) -> BrokerResult<Message> {
        self.inner
            .read()
            .messages
            .get(&id)
            .cloned()
            .ok_or(BrokerError::MessageNotFound(id))
    }

    /// The only state-transition writer. Validates `from -> to` against the
    /// transition graph, stamps `started_at`/`completed_at`, folds `update`
    /// in, and keeps the thread's state counts and `last_activity` in
    /// lockstep.
    #[tracing::instrument(skip(self, update))]
    pub fn transition(
        &self,
        id: Uuid,
        to: MessageState,
        update: TransitionUpdate,
    ) -> BrokerResult<Message> {
        let mut inner = self.inner.write();
        let now = Utc::now();

        let from = {
            let message = inner
                .messages
                .get(&id)
                .ok_or(BrokerError::MessageNotFound(id))?;
            message.state
        };
        if !from.can_transition_to(to) {
            return Err(BrokerError::InvalidTransition { id, from, to });
        }

        let (snapshot, thread_id) = {
            let message = inner.messages.get_mut(&id).expect("checked above");
            match to {
                MessageState::Processing => message.started_at = Some(now),
                MessageState::Completed => {
                    message.completed_at = Some(now);
                    message.result =
                        Some(update.result.unwrap_or_else(|| message.chunks.concat()));
                }
                MessageState::Failed => {
                    message.completed_at = Some(now);
                    message.error = Some(
                        update
                            .error
                            .unwrap_or_else(|| "unknown responder error".to_string()),
                    );
                }
                MessageState::Cancelled => message.completed_at = Some(now),
                MessageState::Queued => unreachable!("no edge in the graph targets Queued"),
            }
            message.state = to;
            (message.clone(), message.thread_id.clone())
        };

        if from == MessageState::Queued {
            inner.queued_count = inner.queued_count.saturating_sub(1);
        }

        if let Some(tid) = thread_id {
            if let Some(meta) = inner.thread_meta.get_mut(&tid) {
                if let Some(count) = meta.states.get_mut(&from) {
                    *count = count.saturating_sub(1);
                }
                *meta.states.entry(to).or_insert(0) += 1;
                meta.last_activity = now;
            }
        }

        tracing::debug!(message_id = %id, ?from, ?to, "state transition");
        Ok(snapshot)
    }

    /// Append one chunk of text to a PROCESSING message and return its
    /// index. Chunk appends are not state transitions (state stays
    /// `Processing`), so they bypass [`MessageStore::transition`]'s graph
    /// check; any other state is refused with `InvalidTransition`.
    pub fn append_chunk(&self, id: Uuid, text: String) -> BrokerResult<usize> {
        let mut inner = self.inner.write();
        let now = Utc::now();
        let thread_id = {
            let message = inner
                .messages
                .get_mut(&id)
                .ok_or(BrokerError::MessageNotFound(id))?;
            if message.state != MessageState::Processing {
                return Err(BrokerError::InvalidTransition {
                    id,
                    from: message.state,
                    to: message.state,
                });
            }
            message.chunks.push(text);
            message.thread_id.clone()
        };
        let index = inner.messages[&id].chunks.len() - 1;

        if let Some(tid) = thread_id {
            if let Some(meta) = inner.thread_meta.get_mut(&tid) {
                meta.last_activity = now;
            }
        }
        Ok(index)
    }

    /// Shorthand for `transition(id, Cancelled, ..)`, refusing anything not
    /// currently QUEUED with [`BrokerError::NotCancellable`] instead of the
    /// generic `InvalidTransition`.
    pub fn cancel(&self, id: Uuid) -> BrokerResult<Message> {
        let current = self.get(id)?;
        if current.state != MessageState::Queued {
            return Err(BrokerError::NotCancellable(id));
        }
        self.transition(id, MessageState::Cancelled, TransitionUpdate::default())
    }

    /// Snapshot of every QUEUED message, in no particular order — callers
    /// needing dispatch order combine this with
    /// [`crate::scheduler::PriorityScheduler::ordered_ids`].
    pub fn queued_snapshot(&self) -> Vec<Message> {
        self.inner
            .read()
            .messages
            .values()
            .filter(|m| m.state == MessageState::Queued)
            .cloned()
            .collect()
    }

    /// The single message currently PROCESSING, if any (invariant #7: there
    /// is never more than one).
    pub fn processing_message(&self) -> Option<Message> {
        self.inner
            .read()
            .messages
            .values()
            .find(|m| m.state == MessageState::Processing)
            .cloned()
    }

    /// Count of messages per [`MessageState`] across the whole store.
    pub fn counts_by_state(&self) -> HashMap<MessageState, usize> {
        let mut counts: HashMap<MessageState, usize> =
            MessageState::ALL.into_iter().map(|s| (s, 0)).collect();
        for message in self.inner.read().messages.values() {
            *counts.entry(message.state).or_insert(0) += 1;
        }
        counts
    }

    pub fn thread_metadata(&self, thread_id: &str) -> BrokerResult<ThreadMetadata> {
        self.inner
            .read()
            .thread_meta
            .get(thread_id)
            .cloned()
            .ok_or_else(|| BrokerError::ThreadNotFound(thread_id.to_string()))
    }

    /// Every thread's metadata, unsorted — callers sort by `last_activity`
    /// descending.
    pub fn all_thread_metadata(&self) -> Vec<ThreadMetadata> {
        self.inner.read().thread_meta.values().cloned().collect()
    }

    /// Messages in `thread_id`, ordered by `created_at` ascending.
    pub fn thread_messages(&self, thread_id: &str) -> BrokerResult<Vec<Message>> {
        let inner = self.inner.read();
        if !inner.thread_meta.contains_key(thread_id) {
            return Err(BrokerError::ThreadNotFound(thread_id.to_string()));
        }
        let ids = inner.thread_index.get(thread_id).cloned().unwrap_or_default();
        let mut messages: Vec<Message> = ids
            .into_iter()
            .filter_map(|id| inner.messages.get(&id).cloned())
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

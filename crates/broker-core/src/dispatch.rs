//! The single dispatch worker: the one task that drains the scheduler and
//! drives each message through PROCESSING to a terminal state via the
//! external [`Responder`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use broker_shared::{BrokerError, MessageState};

use crate::broadcaster::{StreamBroadcaster, StreamEvent};
use crate::responder::{Responder, ResponderChunk, ResponderError};
use crate::scheduler::{Dequeued, PriorityScheduler};
use crate::store::{MessageStore, TransitionUpdate};

/// Fixed error string for a responder that exceeded its wall-clock budget.
pub const TIMEOUT_ERROR: &str = "processing timeout";

enum DriveOutcome {
    Completed(String),
    Failed(String),
}

/// Drains [`PriorityScheduler`], one message at a time, for the lifetime of
/// the engine. There is exactly one of these per [`crate::engine::Engine`].
pub struct DispatchWorker {
    store: Arc<MessageStore>,
    scheduler: Arc<PriorityScheduler>,
    broadcaster: Arc<StreamBroadcaster>,
    responder: Arc<dyn Responder>,
    processing_timeout: Duration,
    shutdown: CancellationToken,
}

impl DispatchWorker {
    pub fn new(
        store: Arc<MessageStore>,
        scheduler: Arc<PriorityScheduler>,
        broadcaster: Arc<StreamBroadcaster>,
        responder: Arc<dyn Responder>,
        processing_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        DispatchWorker {
            store,
            scheduler,
            broadcaster,
            responder,
            processing_timeout,
            shutdown,
        }
    }

    /// Run until `shutdown` is tripped. A tripped shutdown ends the loop
    /// immediately rather than draining whatever remains queued — a
    /// half-finished message left QUEUED is simply picked up again if the
    /// process restarts with fresh state, and the store is in-memory only.
    pub async fn run(self) {
        loop {
            match self.scheduler.dequeue_blocking(&self.shutdown).await {
                Dequeued::Shutdown => {
                    tracing::info!("dispatch worker shutting down");
                    return;
                }
                Dequeued::Id(id) => self.process_one(id).await,
            }
        }
    }

    #[tracing::instrument(skip(self), fields(message_id = %id))]
    async fn process_one(&self, id: Uuid) {
        let message = match self.store.get(id) {
            Ok(m) => m,
            Err(_) => {
                tracing::warn!("dequeued id missing from store, skipping");
                return;
            }
        };

        // The authoritative withdrawal mechanism: a cancelled-while-queued
        // entry is simply skipped here, regardless of scheduler state.
        if message.state != MessageState::Queued {
            tracing::debug!(state = ?message.state, "skipping dequeued entry no longer queued");
            return;
        }

        if let Err(err) =
            self.store
                .transition(id, MessageState::Processing, TransitionUpdate::default())
        {
            self.fail_invariant(id, err);
        }
        self.broadcaster.publish(id, StreamEvent::Started);

        let cancel = CancellationToken::new();
        let drive = self.drive_responder(id, &message.user_message, cancel.clone());

        match tokio::time::timeout(self.processing_timeout, drive).await {
            Ok(DriveOutcome::Completed(result)) => self.complete_message(id, result),
            Ok(DriveOutcome::Failed(error)) => self.fail_message(id, error),
            Err(_elapsed) => {
                cancel.cancel();
                tracing::warn!("processing timeout exceeded, abandoning responder");
                self.fail_message(id, TIMEOUT_ERROR.to_string());
            }
        }
    }

    /// Pull chunks from the responder until it signals a terminal outcome.
    /// Holds no store/scheduler lock while awaiting the next chunk.
    async fn drive_responder(
        &self,
        id: Uuid,
        prompt: &str,
        cancel: CancellationToken,
    ) -> DriveOutcome {
        let mut stream = match self.responder.stream(prompt, cancel).await {
            Ok(stream) => stream,
            Err(err) => return DriveOutcome::Failed(responder_error_message(err)),
        };

        let mut concatenated = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(ResponderChunk::Text(text)) => {
                    let index = match self.store.append_chunk(id, text.clone()) {
                        Ok(index) => index,
                        Err(err) => {
                            self.fail_invariant(id, err);
                        }
                    };
                    concatenated.push_str(&text);
                    self.broadcaster.publish(id, StreamEvent::Chunk { index, text });
                }
                Ok(ResponderChunk::Final(explicit)) => {
                    // An explicit final value wins over concat(chunks).
                    return DriveOutcome::Completed(explicit.unwrap_or(concatenated));
                }
                Err(err) => return DriveOutcome::Failed(responder_error_message(err)),
            }
        }
        // Stream ended without an explicit terminal item: treat whatever was
        // accumulated as the result rather than failing a responder that
        // simply forgot to yield `Final`.
        DriveOutcome::Completed(concatenated)
    }

    fn complete_message(&self, id: Uuid, result: String) {
        match self.store.transition(
            id,
            MessageState::Completed,
            TransitionUpdate::result(result.clone()),
        ) {
            Ok(message) => self.broadcaster.publish(
                id,
                StreamEvent::Done {
                    result,
                    completed_at: message.completed_at.expect("set on completion"),
                },
            ),
            Err(err) => self.fail_invariant(id, err),
        }
    }

    fn fail_message(&self, id: Uuid, error: String) {
        match self
            .store
            .transition(id, MessageState::Failed, TransitionUpdate::error(error.clone()))
        {
            Ok(message) => self.broadcaster.publish(
                id,
                StreamEvent::Error {
                    message: error,
                    completed_at: message.completed_at.expect("set on failure"),
                },
            ),
            Err(err) => self.fail_invariant(id, err),
        }
    }

    /// A transition refused here means the store disagrees with the
    /// scheduler about what state `id` is in — a bug, not a runtime
    /// failure. We log loudly and let the task panic rather than limp on
    /// with a desynchronized store.
    fn fail_invariant(&self, id: Uuid, err: BrokerError) -> ! {
        tracing::error!(message_id = %id, %err, "invariant violation: store/scheduler desync");
        panic!("dispatch worker invariant violated for message {id}: {err}");
    }
}

fn responder_error_message(err: ResponderError) -> String {
    match err {
        ResponderError::Cancelled => "responder cancelled".to_string(),
        ResponderError::Failed(message) => message,
    }
}

//! Unified error taxonomy for broker operations.

use thiserror::Error;
use uuid::Uuid;

use crate::message::MessageState;

/// Result alias used throughout the broker crates.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Every error kind a caller of the core can observe.
///
/// Adapters (notably `broker-http`) map each variant to an HTTP status; see
/// `broker-http::error` for the mapping table.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("queue is full")]
    QueueFull,

    #[error("message not found: {0}")]
    MessageNotFound(Uuid),

    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    #[error("cannot transition message {id} from {from:?} to {to:?}")]
    InvalidTransition {
        id: Uuid,
        from: MessageState,
        to: MessageState,
    },

    #[error("message {0} is not cancellable (already processing or terminal)")]
    NotCancellable(Uuid),

    #[error("processing timeout")]
    Timeout,

    #[error("responder error: {0}")]
    Responder(String),
}

impl BrokerError {
    /// Short machine-readable kind, stable across releases, intended for
    /// structured logging and for the `error` field of SSE/status payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::InvalidInput(_) => "invalid_input",
            BrokerError::QueueFull => "queue_full",
            BrokerError::MessageNotFound(_) => "not_found",
            BrokerError::ThreadNotFound(_) => "not_found",
            BrokerError::InvalidTransition { .. } => "invalid_transition",
            BrokerError::NotCancellable(_) => "not_cancellable",
            BrokerError::Timeout => "timeout",
            BrokerError::Responder(_) => "responder_error",
        }
    }
}

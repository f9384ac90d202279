//! Request/response wire types for the HTTP surface.
//!
//! `broker-core` never sees these: handlers build them from `Message` /
//! `ThreadMetadata` / `Engine` query results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use broker_core::{engine::MessageView, QueueSummary};
use broker_shared::{Message, MessageState, Priority, ThreadMetadata};

fn default_priority() -> Priority {
    Priority::Normal
}

/// Body of `POST /messages`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub user_message: String,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// Response of `POST /messages`: 202 + `{id, state, queue_position,
/// created_at, thread_id}`.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    pub state: MessageState,
    pub queue_position: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub thread_id: Option<String>,
}

/// The full message projection returned by `GET /messages/{id}/status`.
#[derive(Debug, Serialize)]
pub struct MessageStatusResponse {
    pub message_id: Uuid,
    pub state: MessageState,
    pub user_message: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub queue_position: Option<usize>,
    pub thread_id: Option<String>,
}

impl From<MessageView> for MessageStatusResponse {
    fn from(view: MessageView) -> Self {
        message_status(&view.message, view.queue_position)
    }
}

pub fn message_status(message: &Message, queue_position: Option<usize>) -> MessageStatusResponse {
    MessageStatusResponse {
        message_id: message.id,
        state: message.state,
        user_message: message.user_message.clone(),
        priority: message.priority,
        created_at: message.created_at,
        started_at: message.started_at,
        completed_at: message.completed_at,
        result: message.result.clone(),
        error: message.error.clone(),
        queue_position,
        thread_id: message.thread_id.clone(),
    }
}

#[derive(Debug, Serialize)]
pub struct QueuedPreviewDto {
    pub id: Uuid,
    pub priority: Priority,
    pub preview: String,
    pub position: usize,
}

/// Response of `GET /queue`.
#[derive(Debug, Serialize)]
pub struct QueueSummaryResponse {
    pub count_by_state: std::collections::HashMap<MessageState, usize>,
    pub queued_preview: Vec<QueuedPreviewDto>,
    pub processing: Option<MessageStatusResponse>,
}

impl From<QueueSummary> for QueueSummaryResponse {
    fn from(summary: QueueSummary) -> Self {
        QueueSummaryResponse {
            count_by_state: summary.count_by_state,
            queued_preview: summary
                .queued_preview
                .into_iter()
                .map(|p| QueuedPreviewDto {
                    id: p.id,
                    priority: p.priority,
                    preview: p.preview,
                    position: p.position,
                })
                .collect(),
            processing: summary.processing.map(|m| message_status(&m, None)),
        }
    }
}

/// Response of `GET /threads/{tid}` and one entry of `GET /threads`.
#[derive(Debug, Serialize)]
pub struct ThreadMetadataResponse {
    pub thread_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub states: std::collections::HashMap<MessageState, usize>,
    pub last_message_preview: Option<String>,
}

impl From<ThreadMetadata> for ThreadMetadataResponse {
    fn from(meta: ThreadMetadata) -> Self {
        ThreadMetadataResponse {
            thread_id: meta.thread_id,
            message_count: meta.message_count,
            created_at: meta.created_at,
            last_activity: meta.last_activity,
            states: meta.states,
            last_message_preview: meta.last_message_preview,
        }
    }
}

/// Response of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queued: usize,
    pub processing: bool,
}

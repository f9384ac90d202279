//! The [`Message`] record and the small enums that make up its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length, in bytes, of a `thread_id`.
pub const MAX_THREAD_ID_LEN: usize = 255;

/// Length at which `last_message_preview` is truncated.
pub const PREVIEW_LEN: usize = 100;

/// Submission priority. Lower `rank()` dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Scheduler rank: `HIGH=1, NORMAL=2, LOW=3`, ascending dispatch order.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// A message's position in the state transition graph.
///
/// Allowed edges: `Queued -> Processing`, `Queued -> Cancelled`,
/// `Processing -> Completed`, `Processing -> Failed`. All other pairs are
/// refused by [`crate::error::BrokerError::InvalidTransition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl MessageState {
    /// All five variants, used to seed zeroed `states` maps.
    pub const ALL: [MessageState; 5] = [
        MessageState::Queued,
        MessageState::Processing,
        MessageState::Completed,
        MessageState::Failed,
        MessageState::Cancelled,
    ];

    /// Whether this state is a sink in the transition graph.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageState::Completed | MessageState::Failed | MessageState::Cancelled
        )
    }

    /// Whether `self -> to` is an edge of the allowed transition graph.
    pub fn can_transition_to(self, to: MessageState) -> bool {
        matches!(
            (self, to),
            (MessageState::Queued, MessageState::Processing)
                | (MessageState::Queued, MessageState::Cancelled)
                | (MessageState::Processing, MessageState::Completed)
                | (MessageState::Processing, MessageState::Failed)
        )
    }
}

/// One user prompt and its processing record.
///
/// Created on submit with `state = Queued`; mutated exclusively by the
/// dispatch worker and the cancel operation; never destroyed during normal
/// operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub user_message: String,
    pub priority: Priority,
    pub thread_id: Option<String>,
    pub state: MessageState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub chunks: Vec<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    /// Submit-order tiebreaker within a priority tier. Assigned once, at
    /// enqueue time, and never reused.
    pub sequence: u64,
}

impl Message {
    pub(crate) fn new(
        id: Uuid,
        user_message: String,
        priority: Priority,
        thread_id: Option<String>,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Message {
            id,
            user_message,
            priority,
            thread_id,
            state: MessageState::Queued,
            created_at: now,
            started_at: None,
            completed_at: None,
            chunks: Vec::new(),
            result: None,
            error: None,
            sequence,
        }
    }

    /// Prompt preview truncated to [`PREVIEW_LEN`] chars, with a `...` suffix
    /// when truncation occurred. Operates on `char` boundaries, not bytes.
    pub fn preview(&self) -> String {
        truncate_preview(&self.user_message)
    }
}

/// Truncate `text` to [`PREVIEW_LEN`] characters, appending `...` if it was
/// longer. Shared by [`Message::preview`] and thread metadata updates so both
/// always agree on the same rule.
pub fn truncate_preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_LEN).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

//! Derived per-thread bookkeeping kept in lockstep with the message store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::MessageState;

/// Aggregate metadata for one `thread_id`, maintained by
/// `broker-core::store` on every submit and transition that touches a
/// message in the thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMetadata {
    pub thread_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub states: HashMap<MessageState, usize>,
    pub last_message_preview: Option<String>,
}

impl ThreadMetadata {
    pub(crate) fn new(thread_id: String, now: DateTime<Utc>) -> Self {
        let mut states = HashMap::new();
        for state in MessageState::ALL {
            states.insert(state, 0);
        }
        ThreadMetadata {
            thread_id,
            message_count: 0,
            created_at: now,
            last_activity: now,
            states,
            last_message_preview: None,
        }
    }

    /// Sum of the per-state counts. Invariant #3: this must always equal
    /// `message_count`.
    pub fn state_total(&self) -> usize {
        self.states.values().sum()
    }
}

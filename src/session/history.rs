//! # Conversation History Buffer
//!
//! Bounded, ordered buffer of role-tagged chat messages for one interview
//! session. Entry 0 is always the system prompt once greeting begins; the
//! pruning policy preserves it while discarding the oldest conversation
//! turns.
//!
//! ## Key Behaviors:
//! - **Fixed bound**: the buffer never exceeds the configured entry count
//!   after a prune
//! - **System prompt pinned**: pruning keeps entry 0 plus the most recent
//!   `bound − 1` entries
//! - **Prune timing**: runs before every completion request, never
//!   mid-stream

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Role of a chat message as sent to the completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered, bounded sequence of conversation turns.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    entries: VecDeque<ChatMessage>,
    /// Maximum entry count after a prune; must be >= 2 to hold the system
    /// prompt plus at least one turn
    bound: usize,
}

impl ConversationHistory {
    pub fn new(bound: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            bound: bound.max(2),
        }
    }

    /// Append a message. The buffer may temporarily exceed the bound;
    /// callers prune before each completion request.
    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push_back(message);
    }

    /// Enforce the bound: retain entry 0 (the system prompt) and the most
    /// recent `bound − 1` entries, discarding older turns.
    pub fn prune(&mut self) {
        while self.entries.len() > self.bound {
            // entry 0 stays; the oldest conversation turn after it goes
            self.entries.remove(1);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owned copy of the current entries, for handing to a completion task.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.iter().cloned().collect()
    }
}

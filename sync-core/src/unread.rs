//! Per-participant unread status.
//!
//! `Unread(n) → Read` when the participant opens the conversation,
//! `Read → Unread(1)` on an incoming message, and `Unread(n) → Unread(n+1)`
//! on every further incoming message.

use serde::{Deserialize, Serialize};

/// Unread status of one participant in one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UnreadStatus {
    /// Nothing unread.
    Read,
    /// `count` messages received since the last open.
    Unread {
        /// Always greater than zero.
        count: u32,
    },
}

impl UnreadStatus {
    /// Status corresponding to a stored counter value.
    pub fn from_count(count: u32) -> Self {
        if count == 0 {
            Self::Read
        } else {
            Self::Unread { count }
        }
    }

    /// Counter value for this status.
    pub fn count(&self) -> u32 {
        match self {
            Self::Read => 0,
            Self::Unread { count } => *count,
        }
    }

    /// The participant opened the conversation.
    pub fn on_open(self) -> Self {
        Self::Read
    }

    /// The peer sent a message.
    pub fn on_incoming(self) -> Self {
        Self::Unread {
            count: self.count().saturating_add(1),
        }
    }

    /// Check if anything is unread.
    pub fn is_unread(&self) -> bool {
        matches!(self, Self::Unread { .. })
    }
}

impl Default for UnreadStatus {
    fn default() -> Self {
        Self::Read
    }
}

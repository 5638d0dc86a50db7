//! Conversation aggregate, message and profile documents.
//!
//! Field names follow the remote schema (camelCase).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ConversationId, MessageId, UserId};

/// The single mutable document summarizing a two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAggregate {
    /// Order-independent id derived from the participant pair.
    pub id: ConversationId,
    /// The two participants, sorted.
    pub participants: Vec<UserId>,
    /// When the aggregate was first created.
    pub created_at: DateTime<Utc>,
    /// Text of the most recent message (empty until the first send).
    #[serde(default)]
    pub last_message: String,
    /// When the most recent message was sent.
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Who sent the most recent message.
    #[serde(default)]
    pub last_sender_id: Option<UserId>,
    /// Per-participant unread counters.
    #[serde(default)]
    pub unread_counts: BTreeMap<UserId, u32>,
}

impl ConversationAggregate {
    /// Whether `user` is one of the participants.
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| p == user)
    }

    /// The participant that is not `user`, if `user` participates.
    pub fn peer_of(&self, user: &UserId) -> Option<&UserId> {
        if !self.has_participant(user) {
            return None;
        }
        self.participants.iter().find(|p| *p != user)
    }

    /// Unread counter for `user` (missing entries count as zero).
    pub fn unread_for(&self, user: &UserId) -> u32 {
        self.unread_counts.get(user).copied().unwrap_or(0)
    }
}

/// An immutable message in a conversation's append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message id.
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender_id: UserId,
    /// Message body.
    pub text: String,
    /// Send time; display order is ascending by this field.
    pub created_at: DateTime<Utc>,
    /// Read flag (always false when written).
    pub read: bool,
    /// Participants at send time, kept for authorization rules.
    pub participants: Vec<UserId>,
}

/// Display information for a user, resolved by a secondary lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// The user this profile describes.
    pub user_id: UserId,
    /// Name shown as the conversation title.
    pub display_name: String,
    /// Optional avatar URL.
    #[serde(default)]
    pub photo_url: Option<String>,
}

//! Pure transitions on the conversation aggregate.
//!
//! Each function takes the aggregate as read from the remote store and
//! returns the document to write back. sync-client decides how the write is
//! committed (plain set, compare-and-set, or server-side increment).

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use sync_types::{ConversationAggregate, Message, MessageId, UserId};

use crate::identity::{conversation_id, participants};
use crate::unread::UnreadStatus;
use crate::CoreError;

/// Build the aggregate created on first contact between two users.
pub fn new_conversation(
    a: &UserId,
    b: &UserId,
    now: DateTime<Utc>,
) -> Result<ConversationAggregate, CoreError> {
    if a == b {
        return Err(CoreError::SelfConversation(a.clone()));
    }

    Ok(ConversationAggregate {
        id: conversation_id(a, b),
        participants: participants(a, b),
        created_at: now,
        last_message: String::new(),
        last_message_at: None,
        last_sender_id: None,
        unread_counts: BTreeMap::from([(a.clone(), 0), (b.clone(), 0)]),
    })
}

/// `opener` opened the conversation: their counter resets, the peer's is kept.
pub fn mark_opened(
    mut aggregate: ConversationAggregate,
    opener: &UserId,
) -> Result<ConversationAggregate, CoreError> {
    ensure_participant(&aggregate, opener)?;
    let status = UnreadStatus::from_count(aggregate.unread_for(opener)).on_open();
    aggregate.unread_counts.insert(opener.clone(), status.count());
    Ok(aggregate)
}

/// Apply a sent message: the recipient's counter grows by one and the
/// last-message metadata moves forward. The sender's counter is untouched.
pub fn record_message(
    mut aggregate: ConversationAggregate,
    sender: &UserId,
    text: &str,
    at: DateTime<Utc>,
) -> Result<ConversationAggregate, CoreError> {
    let recipient = recipient_of(&aggregate, sender)?;
    let status = UnreadStatus::from_count(aggregate.unread_for(&recipient)).on_incoming();

    aggregate.unread_counts.insert(recipient, status.count());
    aggregate.last_message = text.to_string();
    aggregate.last_message_at = Some(at);
    aggregate.last_sender_id = Some(sender.clone());
    Ok(aggregate)
}

/// The participant that receives a message from `sender`.
pub fn recipient_of(
    aggregate: &ConversationAggregate,
    sender: &UserId,
) -> Result<UserId, CoreError> {
    aggregate
        .peer_of(sender)
        .cloned()
        .ok_or_else(|| CoreError::NotParticipant {
            user: sender.clone(),
            conversation: aggregate.id.clone(),
        })
}

/// Compose the message document for a send, snapshotting participants.
pub fn compose_message(
    aggregate: &ConversationAggregate,
    sender: &UserId,
    text: &str,
    at: DateTime<Utc>,
) -> Result<Message, CoreError> {
    ensure_participant(aggregate, sender)?;
    Ok(Message {
        id: MessageId::new(),
        conversation_id: aggregate.id.clone(),
        sender_id: sender.clone(),
        text: text.to_string(),
        created_at: at,
        read: false,
        participants: aggregate.participants.clone(),
    })
}

fn ensure_participant(aggregate: &ConversationAggregate, user: &UserId) -> Result<(), CoreError> {
    if aggregate.has_participant(user) {
        Ok(())
    } else {
        Err(CoreError::NotParticipant {
            user: user.clone(),
            conversation: aggregate.id.clone(),
        })
    }
}

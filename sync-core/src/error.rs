//! Error types for sync-core.

use sync_types::{ConversationId, EntityKind, ModelError, UserId};
use thiserror::Error;

/// Errors produced by the pure transitions and mappers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Both participants are the same user.
    #[error("cannot start a conversation with yourself ({0})")]
    SelfConversation(UserId),

    /// The user is not a participant of the conversation.
    #[error("{user} is not a participant of {conversation}")]
    NotParticipant {
        /// The acting user.
        user: UserId,
        /// The conversation.
        conversation: ConversationId,
    },

    /// A record or document does not match its entity shape.
    #[error("cannot map {kind} '{id}': {reason}")]
    Mapping {
        /// Entity kind being mapped.
        kind: EntityKind,
        /// Entity id.
        id: String,
        /// What was wrong.
        reason: String,
    },

    /// Model-level validation failed.
    #[error(transparent)]
    Model(#[from] ModelError),
}

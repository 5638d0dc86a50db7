//! Remote canonical store abstraction.
//!
//! The remote store is hierarchical (`users/{owner}/cities/{city}/...`) and
//! owns the conversation aggregates, the message log and user profiles.
//! Everything the engine and the conversation manager need from it goes
//! through the traits in this module:
//!
//! - [`RemoteStore`] - entity documents by parent, by owner, or across owners
//! - [`ConversationStore`] - versioned aggregates, messages, snapshot listener
//! - [`ProfileLookup`] - peer display data
//!
//! [`MemoryRemote`] implements all three in process, with failure injection
//! for tests and a JSON snapshot format for the CLI.

mod memory;

pub use memory::{MemoryRemote, RemoteSnapshot};

use async_trait::async_trait;
use sync_types::{
    ConversationAggregate, ConversationId, EntityKind, Message, Profile, RemoteDoc, UserId,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Remote store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote could not be reached or refused the request.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// The addressed document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A compare-and-set write lost against a concurrent writer.
    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        /// Document id.
        id: String,
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// The store does not implement the requested primitive.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// A profile lookup failed.
    #[error("profile lookup failed for {user}: {reason}")]
    LookupFailed {
        /// The user being looked up.
        user: UserId,
        /// Failure description.
        reason: String,
    },
}

/// A document together with the store-assigned version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// The document.
    pub value: T,
    /// Monotonic per-document version; absent documents are version 0.
    pub version: u64,
}

/// Receiver side of a conversation snapshot listener.
///
/// Each item is the full set of aggregates the watched user participates in.
/// Dropping the receiver detaches the listener.
pub type SnapshotReceiver = mpsc::UnboundedReceiver<Vec<ConversationAggregate>>;

/// Entity document queries against the remote canonical store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Documents of `kind` under `users/{owner_id}/cities/{parent_id}`.
    async fn fetch_by_parent(
        &self,
        kind: EntityKind,
        owner_id: &UserId,
        parent_id: &str,
    ) -> Result<Vec<RemoteDoc>, RemoteError>;

    /// Every document of `kind` owned by `owner_id`.
    async fn fetch_by_owner(
        &self,
        kind: EntityKind,
        owner_id: &UserId,
    ) -> Result<Vec<RemoteDoc>, RemoteError>;

    /// Users that own at least one document.
    async fn list_owners(&self) -> Result<Vec<UserId>, RemoteError>;

    /// Every document of `kind`, across owners.
    ///
    /// The default fans out over [`list_owners`](Self::list_owners); stores
    /// with a native collection-group query should override it.
    async fn fetch_all(&self, kind: EntityKind) -> Result<Vec<RemoteDoc>, RemoteError> {
        let mut docs = Vec::new();
        for owner in self.list_owners().await? {
            docs.extend(self.fetch_by_owner(kind, &owner).await?);
        }
        Ok(docs)
    }
}

/// Conversation aggregates and the message log.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Read an aggregate with its version.
    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Versioned<ConversationAggregate>>, RemoteError>;

    /// Write an aggregate. Returns the new version.
    ///
    /// `expected_version` of `None` overwrites unconditionally; `Some(v)`
    /// fails with [`RemoteError::Conflict`] unless the stored version is `v`
    /// (0 meaning "must not exist").
    async fn put_conversation(
        &self,
        aggregate: &ConversationAggregate,
        expected_version: Option<u64>,
    ) -> Result<u64, RemoteError>;

    /// Atomically add one to the recipient's counter and move the last-message
    /// fields to `message`.
    async fn increment_unread(
        &self,
        _message: &Message,
        _recipient: &UserId,
    ) -> Result<(), RemoteError> {
        Err(RemoteError::Unsupported("atomic unread increment"))
    }

    /// Append a message to the conversation log.
    async fn append_message(&self, message: &Message) -> Result<(), RemoteError>;

    /// Every message of a conversation, in no particular order.
    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, RemoteError>;

    /// Listen to the aggregates `user` participates in.
    ///
    /// The current set is delivered immediately, then again after every change.
    async fn watch_conversations(&self, user: &UserId) -> Result<SnapshotReceiver, RemoteError>;
}

/// Secondary lookup of user display data.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    /// Resolve a user's profile.
    async fn lookup(&self, user: &UserId) -> Result<Profile, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = RemoteError::Conflict {
            id: "alice_bob".into(),
            expected: 3,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "version conflict on alice_bob: expected 3, found 4"
        );
        assert_eq!(
            RemoteError::Unavailable("offline".into()).to_string(),
            "remote store unavailable: offline"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RemoteError>();
    }
}

//! Conversation consistency manager.
//!
//! Keeps the per-pair conversation aggregate consistent with the append-only
//! message log:
//!
//! - [`ConversationManager::ensure_conversation`] creates the aggregate on
//!   first contact and resets the caller's unread counter on every open.
//! - [`ConversationManager::send_message`] appends the message, then bumps
//!   the recipient's counter using the configured [`CounterStrategy`].
//! - [`ConversationManager::listen`] turns the remote snapshot listener into
//!   a live, sorted roster with lazily resolved peer profiles.

use crate::remote::{ConversationStore, ProfileLookup, RemoteError, Versioned};
use chrono::Utc;
use futures_util::Stream;
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use sync_core::aggregate::{compose_message, mark_opened, new_conversation, recipient_of, record_message};
use sync_core::{build_roster, conversation_id, unresolved_peers, ConversationSummary, CoreError};
use sync_types::{ConversationAggregate, ConversationId, Message, MessageId, Profile, UserId};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::ReceiverStream;

/// Default number of optimistic write attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default number of rosters buffered for a slow subscriber.
pub const DEFAULT_ROSTER_CAPACITY: usize = 32;

/// Conversation errors.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// The remote store failed.
    #[error("remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// Both participants are the same user.
    #[error("cannot start a conversation with yourself ({0})")]
    SelfConversation(UserId),

    /// No aggregate exists for the id.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),

    /// The user is not a participant of the conversation.
    #[error("{user} is not a participant of {conversation}")]
    NotParticipant {
        /// The acting user.
        user: UserId,
        /// The conversation.
        conversation: ConversationId,
    },

    /// The message was appended but the aggregate update failed.
    ///
    /// The recipient's counter undercounts by one; it never goes negative.
    #[error("message {message_id} stored but unread counter not updated: {source}")]
    CounterUpdate {
        /// The appended message.
        message_id: MessageId,
        /// Why the update failed.
        #[source]
        source: Box<ConversationError>,
    },

    /// Every optimistic write attempt lost against a concurrent writer.
    #[error("gave up on {conversation} after {attempts} conflicting writes")]
    RetriesExhausted {
        /// The conversation.
        conversation: ConversationId,
        /// Attempts made.
        attempts: u32,
    },

    /// Any other aggregate rule violation.
    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for ConversationError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::SelfConversation(user) => Self::SelfConversation(user),
            CoreError::NotParticipant { user, conversation } => {
                Self::NotParticipant { user, conversation }
            }
            other => Self::Core(other),
        }
    }
}

/// How the aggregate is written after a send or an open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterStrategy {
    /// Read, modify, write unconditionally. Concurrent sends to one
    /// conversation can lose increments.
    ReadModifyWrite,
    /// Server-side atomic increment. Fails on stores without the primitive.
    AtomicIncrement,
    /// Versioned compare-and-set, re-read and retried on conflict.
    OptimisticRetry {
        /// Total write attempts before giving up.
        max_attempts: u32,
    },
}

impl Default for CounterStrategy {
    fn default() -> Self {
        Self::OptimisticRetry {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Conversation manager configuration.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Aggregate write strategy.
    pub counter_strategy: CounterStrategy,
    /// Rosters buffered for a slow subscriber.
    pub roster_capacity: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            counter_strategy: CounterStrategy::default(),
            roster_capacity: DEFAULT_ROSTER_CAPACITY,
        }
    }
}

impl ConversationConfig {
    /// Set the counter strategy.
    pub fn with_counter_strategy(mut self, strategy: CounterStrategy) -> Self {
        self.counter_strategy = strategy;
        self
    }

    /// Set the roster buffer (at least 1).
    pub fn with_roster_capacity(mut self, capacity: usize) -> Self {
        self.roster_capacity = capacity.max(1);
        self
    }
}

/// Conversation consistency manager.
pub struct ConversationManager<S, P> {
    store: Arc<S>,
    profiles: Arc<P>,
    config: ConversationConfig,
}

impl<S, P> Clone for ConversationManager<S, P> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            profiles: Arc::clone(&self.profiles),
            config: self.config.clone(),
        }
    }
}

impl<S, P> ConversationManager<S, P>
where
    S: ConversationStore + 'static,
    P: ProfileLookup + 'static,
{
    /// Create a manager over a conversation store and a profile lookup.
    pub fn new(store: Arc<S>, profiles: Arc<P>, config: ConversationConfig) -> Self {
        Self {
            store,
            profiles,
            config,
        }
    }

    /// The manager's configuration.
    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Open (creating on first contact) the conversation between `caller`
    /// and `peer`, resetting the caller's unread counter.
    pub async fn ensure_conversation(
        &self,
        caller: &UserId,
        peer: &UserId,
    ) -> Result<ConversationId, ConversationError> {
        if caller == peer {
            return Err(ConversationError::SelfConversation(caller.clone()));
        }
        let id = conversation_id(caller, peer);

        let existing = match self.store.get_conversation(&id).await? {
            Some(current) => Some(current),
            None => self.create(&id, caller, peer).await?,
        };
        if let Some(current) = existing {
            if current.value.unread_for(caller) > 0 {
                self.commit(&id, current, |aggregate| mark_opened(aggregate, caller))
                    .await?;
                tracing::debug!("{} opened {}; unread reset", caller, id);
            }
        }
        Ok(id)
    }

    /// Write a fresh aggregate. Returns the stored one instead when the
    /// peer created it first; under optimistic retry the write only
    /// succeeds if the id is still unused.
    async fn create(
        &self,
        id: &ConversationId,
        caller: &UserId,
        peer: &UserId,
    ) -> Result<Option<Versioned<ConversationAggregate>>, ConversationError> {
        let aggregate = new_conversation(caller, peer, Utc::now())?;
        let expected_version = match self.config.counter_strategy {
            CounterStrategy::OptimisticRetry { .. } => Some(0),
            _ => None,
        };

        match self.store.put_conversation(&aggregate, expected_version).await {
            Ok(_) => {
                tracing::info!("Created conversation {}", id);
                Ok(None)
            }
            Err(RemoteError::Conflict { .. }) => {
                tracing::debug!("{} was created concurrently, re-reading", id);
                let current = self
                    .store
                    .get_conversation(id)
                    .await?
                    .ok_or_else(|| ConversationError::NotFound(id.clone()))?;
                Ok(Some(current))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Send a message.
    ///
    /// The message is appended first. If the aggregate update fails
    /// afterwards, the message stays in the log and
    /// [`ConversationError::CounterUpdate`] is returned.
    pub async fn send_message(
        &self,
        id: &ConversationId,
        sender: &UserId,
        text: &str,
    ) -> Result<Message, ConversationError> {
        let current = self
            .store
            .get_conversation(id)
            .await?
            .ok_or_else(|| ConversationError::NotFound(id.clone()))?;
        let recipient = recipient_of(&current.value, sender)?;
        let message = compose_message(&current.value, sender, text, Utc::now())?;

        self.store.append_message(&message).await?;

        if let Err(err) = self.bump_unread(current, &message, &recipient).await {
            tracing::warn!(
                "Message {} in {} stored without counter update: {}",
                message.id,
                id,
                err
            );
            return Err(ConversationError::CounterUpdate {
                message_id: message.id,
                source: Box::new(err),
            });
        }

        tracing::debug!("{} sent message {} in {}", sender, message.id, id);
        Ok(message)
    }

    /// Messages of a conversation in display order (oldest first).
    pub async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, ConversationError> {
        let mut messages = self.store.messages(id).await?;
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    /// Subscribe to `user`'s conversation roster.
    ///
    /// A full roster is emitted for every remote snapshot, and again whenever
    /// a peer profile resolves. Dropping the subscription detaches the
    /// remote listener.
    pub async fn listen(&self, user: &UserId) -> Result<RosterSubscription, ConversationError> {
        let snapshots = self.store.watch_conversations(user).await?;
        let (tx, rx) = mpsc::channel(self.config.roster_capacity.max(1));
        let task = tokio::spawn(run_roster(
            user.clone(),
            snapshots,
            Arc::clone(&self.profiles),
            tx,
        ));

        Ok(RosterSubscription {
            rosters: ReceiverStream::new(rx),
            task,
        })
    }

    async fn bump_unread(
        &self,
        current: Versioned<ConversationAggregate>,
        message: &Message,
        recipient: &UserId,
    ) -> Result<(), ConversationError> {
        match self.config.counter_strategy {
            CounterStrategy::AtomicIncrement => {
                self.store.increment_unread(message, recipient).await?;
                Ok(())
            }
            _ => {
                self.commit(&message.conversation_id, current, |aggregate| {
                    record_message(aggregate, &message.sender_id, &message.text, message.created_at)
                })
                .await
            }
        }
    }

    /// Write `mutate(current)` back according to the counter strategy.
    async fn commit<F>(
        &self,
        id: &ConversationId,
        mut current: Versioned<ConversationAggregate>,
        mutate: F,
    ) -> Result<(), ConversationError>
    where
        F: Fn(ConversationAggregate) -> Result<ConversationAggregate, CoreError> + Send + Sync,
    {
        let max_attempts = match self.config.counter_strategy {
            CounterStrategy::OptimisticRetry { max_attempts } => max_attempts.max(1),
            _ => {
                let next = mutate(current.value)?;
                self.store.put_conversation(&next, None).await?;
                return Ok(());
            }
        };

        for attempt in 1..=max_attempts {
            let next = mutate(current.value)?;
            match self.store.put_conversation(&next, Some(current.version)).await {
                Ok(_) => return Ok(()),
                Err(RemoteError::Conflict { .. }) if attempt < max_attempts => {
                    tracing::debug!(
                        "Write conflict on {} (attempt {}/{}), re-reading",
                        id,
                        attempt,
                        max_attempts
                    );
                    current = self
                        .store
                        .get_conversation(id)
                        .await?
                        .ok_or_else(|| ConversationError::NotFound(id.clone()))?;
                }
                Err(RemoteError::Conflict { .. }) => break,
                Err(err) => return Err(err.into()),
            }
        }

        Err(ConversationError::RetriesExhausted {
            conversation: id.clone(),
            attempts: max_attempts,
        })
    }
}

/// Roster builder loop: one task per subscription.
async fn run_roster<P: ProfileLookup + 'static>(
    viewer: UserId,
    mut snapshots: crate::remote::SnapshotReceiver,
    lookups: Arc<P>,
    tx: mpsc::Sender<Vec<ConversationSummary>>,
) {
    let mut latest: Vec<ConversationAggregate> = Vec::new();
    let mut profiles: HashMap<UserId, Profile> = HashMap::new();
    let mut in_flight: HashSet<UserId> = HashSet::new();
    let mut pending = JoinSet::new();

    loop {
        tokio::select! {
            snapshot = snapshots.recv() => {
                let Some(snapshot) = snapshot else {
                    tracing::debug!("Snapshot listener for {} closed", viewer);
                    break;
                };
                latest = snapshot;

                for peer in unresolved_peers(&viewer, &latest, &profiles) {
                    if in_flight.insert(peer.clone()) {
                        let lookups = Arc::clone(&lookups);
                        pending.spawn(async move {
                            let result = lookups.lookup(&peer).await;
                            (peer, result)
                        });
                    }
                }
            }
            Some(joined) = pending.join_next(), if !pending.is_empty() => {
                match joined {
                    Ok((peer, Ok(profile))) => {
                        in_flight.remove(&peer);
                        profiles.insert(peer, profile);
                    }
                    Ok((peer, Err(err))) => {
                        // Retried on the next snapshot.
                        tracing::warn!("Profile lookup for {} failed: {}", peer, err);
                        in_flight.remove(&peer);
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!("Profile lookup task failed: {}", err);
                        continue;
                    }
                }
            }
        }

        let roster = build_roster(&viewer, &latest, &profiles);
        tracing::debug!("Roster for {} rebuilt: {} conversations", viewer, roster.len());
        if tx.send(roster).await.is_err() {
            break;
        }
    }
}

/// A live roster stream returned by [`ConversationManager::listen`].
///
/// Every item is the complete, sorted roster. Dropping the subscription
/// stops the background task and detaches the remote listener.
pub struct RosterSubscription {
    rosters: ReceiverStream<Vec<ConversationSummary>>,
    task: JoinHandle<()>,
}

impl RosterSubscription {
    /// Stop listening.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Stream for RosterSubscription {
    type Item = Vec<ConversationSummary>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rosters).poll_next(cx)
    }
}

impl Drop for RosterSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

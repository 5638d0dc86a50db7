//! In-memory remote store.
//!
//! Stands in for the hosted canonical store in tests and in the CLI, where it
//! is loaded from and saved to a JSON [`RemoteSnapshot`].

use super::{
    ConversationStore, ProfileLookup, RemoteError, RemoteStore, SnapshotReceiver, Versioned,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use sync_types::{
    ConversationAggregate, ConversationId, DocPath, EntityKind, Fields, Message, Profile,
    RemoteDoc, UserId,
};
use tokio::sync::mpsc;

/// Serializable contents of a [`MemoryRemote`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Entity documents.
    #[serde(default)]
    pub documents: Vec<RemoteDoc>,
    /// Conversation aggregates.
    #[serde(default)]
    pub conversations: Vec<ConversationAggregate>,
    /// Message log.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// User profiles.
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

/// In-memory remote store.
///
/// Clones share state, so a test can keep a handle for failure injection
/// while the engine owns another.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<DocPath, Fields>,
    conversations: BTreeMap<ConversationId, Versioned<ConversationAggregate>>,
    messages: Vec<Message>,
    profiles: HashMap<UserId, Profile>,
    watchers: Vec<(UserId, mpsc::UnboundedSender<Vec<ConversationAggregate>>)>,
    offline: bool,
    fail_next_fetch: Option<String>,
    fail_next_conversation_write: Option<String>,
    failing_lookups: HashMap<UserId, u32>,
    no_atomic_increment: bool,
    fetch_delay: Option<Duration>,
    fetch_calls: usize,
    lookup_calls: usize,
}

impl Inner {
    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline {
            Err(RemoteError::Unavailable("remote store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn snapshot_for(&self, user: &UserId) -> Vec<ConversationAggregate> {
        self.conversations
            .values()
            .filter(|v| v.value.has_participant(user))
            .map(|v| v.value.clone())
            .collect()
    }

    fn notify(&mut self) {
        let watchers = std::mem::take(&mut self.watchers);
        self.watchers = watchers
            .into_iter()
            .filter(|(user, tx)| tx.send(self.snapshot_for(user)).is_ok())
            .collect();
    }

    fn docs_where(&self, keep: impl Fn(&DocPath) -> bool) -> Vec<RemoteDoc> {
        self.docs
            .iter()
            .filter(|(path, _)| keep(path))
            .map(|(path, fields)| RemoteDoc::new(path.clone(), fields.clone()))
            .collect()
    }
}

impl MemoryRemote {
    /// Create an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a remote from a snapshot. Every aggregate starts at version 1.
    pub fn from_snapshot(snapshot: RemoteSnapshot) -> Self {
        let remote = Self::new();
        {
            let mut inner = remote.lock();
            for doc in snapshot.documents {
                inner.docs.insert(doc.path, doc.fields);
            }
            for aggregate in snapshot.conversations {
                inner.conversations.insert(
                    aggregate.id.clone(),
                    Versioned {
                        value: aggregate,
                        version: 1,
                    },
                );
            }
            inner.messages = snapshot.messages;
            for profile in snapshot.profiles {
                inner.profiles.insert(profile.user_id.clone(), profile);
            }
        }
        remote
    }

    /// Current contents as a snapshot.
    pub fn snapshot(&self) -> RemoteSnapshot {
        let inner = self.lock();
        let mut profiles: Vec<Profile> = inner.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        RemoteSnapshot {
            documents: inner.docs_where(|_| true),
            conversations: inner
                .conversations
                .values()
                .map(|v| v.value.clone())
                .collect(),
            messages: inner.messages.clone(),
            profiles,
        }
    }

    /// Store or overwrite a document.
    pub fn insert_doc(&self, doc: RemoteDoc) {
        self.lock().docs.insert(doc.path, doc.fields);
    }

    /// Remove a document. Returns whether it existed.
    pub fn remove_doc(&self, path: &DocPath) -> bool {
        self.lock().docs.remove(path).is_some()
    }

    /// Store or overwrite a profile.
    pub fn insert_profile(&self, profile: Profile) {
        self.lock().profiles.insert(profile.user_id.clone(), profile);
    }

    /// Read an aggregate without going through the store trait.
    pub fn conversation(&self, id: &ConversationId) -> Option<ConversationAggregate> {
        self.lock().conversations.get(id).map(|v| v.value.clone())
    }

    /// Make every call fail with [`RemoteError::Unavailable`] until reset.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Cause the next fetch to fail with the given error.
    pub fn fail_next_fetch(&self, error: &str) {
        self.lock().fail_next_fetch = Some(error.to_string());
    }

    /// Cause the next aggregate write (put or increment) to fail.
    pub fn fail_next_conversation_write(&self, error: &str) {
        self.lock().fail_next_conversation_write = Some(error.to_string());
    }

    /// Cause the next `times` lookups of `user` to fail.
    pub fn fail_lookups(&self, user: &UserId, times: u32) {
        self.lock().failing_lookups.insert(user.clone(), times);
    }

    /// Stall every fetch for `delay` before answering.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.lock().fetch_delay = Some(delay);
    }

    /// Drop support for [`ConversationStore::increment_unread`].
    pub fn without_atomic_increment(self) -> Self {
        self.lock().no_atomic_increment = true;
        self
    }

    /// Number of fetch calls served (including failed ones).
    pub fn fetch_calls(&self) -> usize {
        self.lock().fetch_calls
    }

    /// Number of profile lookups served (including failed ones).
    pub fn lookup_calls(&self) -> usize {
        self.lock().lookup_calls
    }

    /// Number of attached snapshot listeners.
    pub fn watcher_count(&self) -> usize {
        let mut inner = self.lock();
        inner.watchers.retain(|(_, tx)| !tx.is_closed());
        inner.watchers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn before_fetch(&self) -> Result<(), RemoteError> {
        let delay = {
            let mut inner = self.lock();
            inner.fetch_calls += 1;
            inner.check_online()?;
            if let Some(error) = inner.fail_next_fetch.take() {
                return Err(RemoteError::Unavailable(error));
            }
            inner.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch_by_parent(
        &self,
        kind: EntityKind,
        owner_id: &UserId,
        parent_id: &str,
    ) -> Result<Vec<RemoteDoc>, RemoteError> {
        self.before_fetch().await?;
        Ok(self.lock().docs_where(|path| {
            path.collection() == kind.collection()
                && path.depth() == kind.owner_depth() + 1
                && path.ancestor_id(1) == Some(parent_id)
                && path.ancestor_id(kind.owner_depth()) == Some(owner_id.as_str())
        }))
    }

    async fn fetch_by_owner(
        &self,
        kind: EntityKind,
        owner_id: &UserId,
    ) -> Result<Vec<RemoteDoc>, RemoteError> {
        self.before_fetch().await?;
        Ok(self.lock().docs_where(|path| {
            path.collection() == kind.collection()
                && path.depth() == kind.owner_depth() + 1
                && path.ancestor_id(kind.owner_depth()) == Some(owner_id.as_str())
        }))
    }

    async fn list_owners(&self) -> Result<Vec<UserId>, RemoteError> {
        self.before_fetch().await?;
        let owners: BTreeSet<UserId> = self
            .lock()
            .docs
            .keys()
            .filter_map(|path| path.ancestor_id(path.depth() - 1))
            .map(UserId::from)
            .collect();
        Ok(owners.into_iter().collect())
    }
}

#[async_trait]
impl ConversationStore for MemoryRemote {
    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Versioned<ConversationAggregate>>, RemoteError> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.conversations.get(id).cloned())
    }

    async fn put_conversation(
        &self,
        aggregate: &ConversationAggregate,
        expected_version: Option<u64>,
    ) -> Result<u64, RemoteError> {
        let mut inner = self.lock();
        inner.check_online()?;
        if let Some(error) = inner.fail_next_conversation_write.take() {
            return Err(RemoteError::Unavailable(error));
        }

        let current = inner
            .conversations
            .get(&aggregate.id)
            .map(|v| v.version)
            .unwrap_or(0);
        if let Some(expected) = expected_version {
            if expected != current {
                return Err(RemoteError::Conflict {
                    id: aggregate.id.to_string(),
                    expected,
                    actual: current,
                });
            }
        }

        let version = current + 1;
        inner.conversations.insert(
            aggregate.id.clone(),
            Versioned {
                value: aggregate.clone(),
                version,
            },
        );
        inner.notify();
        Ok(version)
    }

    async fn increment_unread(
        &self,
        message: &Message,
        recipient: &UserId,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.check_online()?;
        if inner.no_atomic_increment {
            return Err(RemoteError::Unsupported("atomic unread increment"));
        }
        if let Some(error) = inner.fail_next_conversation_write.take() {
            return Err(RemoteError::Unavailable(error));
        }

        let entry = inner
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| RemoteError::NotFound(message.conversation_id.to_string()))?;
        let counter = entry.value.unread_counts.entry(recipient.clone()).or_insert(0);
        *counter = counter.saturating_add(1);
        entry.value.last_message = message.text.clone();
        entry.value.last_message_at = Some(message.created_at);
        entry.value.last_sender_id = Some(message.sender_id.clone());
        entry.version += 1;

        inner.notify();
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.check_online()?;
        inner.messages.push(message.clone());
        Ok(())
    }

    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, RemoteError> {
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner
            .messages
            .iter()
            .filter(|m| &m.conversation_id == id)
            .cloned()
            .collect())
    }

    async fn watch_conversations(&self, user: &UserId) -> Result<SnapshotReceiver, RemoteError> {
        let mut inner = self.lock();
        inner.check_online()?;

        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive; the initial send cannot fail.
        let _ = tx.send(inner.snapshot_for(user));
        inner.watchers.push((user.clone(), tx));
        Ok(rx)
    }
}

#[async_trait]
impl ProfileLookup for MemoryRemote {
    async fn lookup(&self, user: &UserId) -> Result<Profile, RemoteError> {
        let mut inner = self.lock();
        inner.lookup_calls += 1;

        let failure = if inner.offline {
            Some("remote store is offline".to_string())
        } else {
            match inner.failing_lookups.get_mut(user) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Some("injected lookup failure".to_string())
                }
                _ => None,
            }
        };
        if let Some(reason) = failure {
            return Err(RemoteError::LookupFailed {
                user: user.clone(),
                reason,
            });
        }

        inner
            .profiles
            .get(user)
            .cloned()
            .ok_or_else(|| RemoteError::LookupFailed {
                user: user.clone(),
                reason: "no such profile".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use sync_types::MessageId;

    fn place(owner: &str, city: &str, id: &str) -> RemoteDoc {
        RemoteDoc::new(
            DocPath::new("users", owner)
                .child("cities", city)
                .child("locations", id),
            Fields::new(),
        )
    }

    fn aggregate(a: &str, b: &str) -> ConversationAggregate {
        ConversationAggregate {
            id: ConversationId::from_raw(format!("{}_{}", a, b)),
            participants: vec![UserId::from(a), UserId::from(b)],
            created_at: Utc::now(),
            last_message: String::new(),
            last_message_at: None,
            last_sender_id: None,
            unread_counts: BTreeMap::from([(UserId::from(a), 0), (UserId::from(b), 0)]),
        }
    }

    #[tokio::test]
    async fn fetch_by_parent_scopes_to_owner_and_city() {
        let remote = MemoryRemote::new();
        remote.insert_doc(place("alice", "paris", "louvre"));
        remote.insert_doc(place("alice", "rome", "colosseum"));
        remote.insert_doc(place("bob", "paris", "orsay"));

        let docs = remote
            .fetch_by_parent(EntityKind::Location, &UserId::from("alice"), "paris")
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id(), "louvre");
    }

    #[tokio::test]
    async fn fetch_all_fans_out_over_owners() {
        let remote = MemoryRemote::new();
        remote.insert_doc(place("alice", "paris", "louvre"));
        remote.insert_doc(place("bob", "paris", "orsay"));
        remote.insert_doc(RemoteDoc::new(
            DocPath::new("users", "carol").child("cities", "oslo"),
            Fields::new(),
        ));

        let owners = remote.list_owners().await.unwrap();
        assert_eq!(owners.len(), 3);

        let docs = remote.fetch_all(EntityKind::Location).await.unwrap();
        let mut ids: Vec<&str> = docs.iter().map(|d| d.id()).collect();
        ids.sort();
        assert_eq!(ids, vec!["louvre", "orsay"]);

        let cities = remote.fetch_all(EntityKind::City).await.unwrap();
        assert_eq!(cities.len(), 1);
    }

    #[tokio::test]
    async fn injected_fetch_failure_is_one_shot() {
        let remote = MemoryRemote::new();
        remote.fail_next_fetch("boom");

        let err = remote
            .fetch_by_owner(EntityKind::City, &UserId::from("alice"))
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::Unavailable("boom".into()));
        assert!(remote
            .fetch_by_owner(EntityKind::City, &UserId::from("alice"))
            .await
            .is_ok());
        assert_eq!(remote.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn offline_fails_everything() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);

        assert!(remote.list_owners().await.is_err());
        assert!(remote
            .get_conversation(&ConversationId::from_raw("a_b"))
            .await
            .is_err());
        assert!(remote.watch_conversations(&UserId::from("a")).await.is_err());
    }

    #[tokio::test]
    async fn put_with_stale_version_conflicts() {
        let remote = MemoryRemote::new();
        let agg = aggregate("alice", "bob");

        assert_eq!(remote.put_conversation(&agg, Some(0)).await.unwrap(), 1);
        assert!(matches!(
            remote.put_conversation(&agg, Some(0)).await,
            Err(RemoteError::Conflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));
        assert_eq!(remote.put_conversation(&agg, Some(1)).await.unwrap(), 2);
        assert_eq!(remote.put_conversation(&agg, None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn increment_bumps_counter_and_version() {
        let remote = MemoryRemote::new();
        let agg = aggregate("alice", "bob");
        remote.put_conversation(&agg, None).await.unwrap();

        let message = Message {
            id: MessageId::new(),
            conversation_id: agg.id.clone(),
            sender_id: UserId::from("alice"),
            text: "hi".into(),
            created_at: Utc::now(),
            read: false,
            participants: agg.participants.clone(),
        };
        remote
            .increment_unread(&message, &UserId::from("bob"))
            .await
            .unwrap();

        let stored = remote.get_conversation(&agg.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.value.unread_for(&UserId::from("bob")), 1);
        assert_eq!(stored.value.last_message, "hi");
    }

    #[tokio::test]
    async fn increment_can_be_unsupported() {
        let remote = MemoryRemote::new().without_atomic_increment();
        let agg = aggregate("alice", "bob");
        let message = Message {
            id: MessageId::new(),
            conversation_id: agg.id.clone(),
            sender_id: UserId::from("alice"),
            text: "hi".into(),
            created_at: Utc::now(),
            read: false,
            participants: agg.participants,
        };

        assert!(matches!(
            remote
                .increment_unread(&message, &UserId::from("bob"))
                .await,
            Err(RemoteError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn watcher_gets_initial_and_updates_then_detaches() {
        let remote = MemoryRemote::new();
        remote
            .put_conversation(&aggregate("alice", "bob"), None)
            .await
            .unwrap();

        let mut rx = remote
            .watch_conversations(&UserId::from("alice"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 1);

        remote
            .put_conversation(&aggregate("alice", "carol"), None)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 2);

        // Not a participant: alice still gets a snapshot, unchanged in size
        remote
            .put_conversation(&aggregate("bob", "carol"), None)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 2);

        assert_eq!(remote.watcher_count(), 1);
        drop(rx);
        assert_eq!(remote.watcher_count(), 0);
    }

    #[tokio::test]
    async fn lookup_failures_count_down() {
        let remote = MemoryRemote::new();
        let bob = UserId::from("bob");
        remote.insert_profile(Profile {
            user_id: bob.clone(),
            display_name: "Bob".into(),
            photo_url: None,
        });
        remote.fail_lookups(&bob, 1);

        assert!(matches!(
            remote.lookup(&bob).await,
            Err(RemoteError::LookupFailed { .. })
        ));
        assert_eq!(remote.lookup(&bob).await.unwrap().display_name, "Bob");
        assert!(remote.lookup(&UserId::from("ghost")).await.is_err());
        assert_eq!(remote.lookup_calls(), 3);
    }

    #[tokio::test]
    async fn snapshot_survives_json() {
        let remote = MemoryRemote::new();
        remote.insert_doc(place("alice", "paris", "louvre"));
        remote
            .put_conversation(&aggregate("alice", "bob"), None)
            .await
            .unwrap();

        let json = serde_json::to_string(&remote.snapshot()).unwrap();
        let restored = MemoryRemote::from_snapshot(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.snapshot(), remote.snapshot());
        assert!(restored
            .conversation(&ConversationId::from_raw("alice_bob"))
            .is_some());
    }
}

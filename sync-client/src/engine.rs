//! Offline-first sync engine.
//!
//! [`SyncEngine`] interprets the actions of the pure
//! [`SyncCycle`](sync_core::SyncCycle) machine against a [`CacheStore`] and a
//! [`RemoteStore`]:
//!
//! ```text
//! subscribe ─► read cache ─► Emit(Loading | cached Success)
//!                  │
//!                  ▼
//!            fetch remote ──(non-empty)──► merge into cache ─┐
//!                  │ (empty: guard)                          │
//!                  │ (failed)                                ▼
//!                  └──────────────────────────────────► reload cache ─► Emit(terminal)
//! ```
//!
//! Each cycle runs on its own tokio task. Dropping a subscription therefore
//! never cancels a fetch that is already in flight; its merge still lands.

use crate::remote::{RemoteError, RemoteStore};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use sync_core::{record_from_doc, Action, DataState, Entity, Event, SyncCycle};
use sync_store::{CacheScope, CacheStore, StorageError};
use sync_types::{CacheRecord, EntityKind, UserId};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Default number of refresh results buffered per lagging subscriber.
pub const DEFAULT_REFRESH_CAPACITY: usize = 16;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The local cache failed. This is a hard failure.
    #[error("cache unavailable: {0}")]
    Cache(#[from] StorageError),

    /// The remote store failed.
    #[error("remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// The background sync task panicked or was cancelled.
    #[error("sync task failed: {0}")]
    Task(String),
}

/// How a non-empty remote answer is merged into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Upsert the answer and drop cached rows of the same scope it no longer
    /// contains, in one transaction.
    #[default]
    Replace,
    /// Upsert the answer; rows it does not mention are kept.
    Upsert,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Merge policy for non-empty remote answers.
    pub merge_policy: MergePolicy,
    /// Refresh results buffered for each open subscription.
    pub refresh_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            merge_policy: MergePolicy::default(),
            refresh_capacity: DEFAULT_REFRESH_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Set the merge policy.
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Set the per-subscription refresh buffer (at least 1).
    pub fn with_refresh_capacity(mut self, capacity: usize) -> Self {
        self.refresh_capacity = capacity.max(1);
        self
    }
}

/// What to synchronize.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    /// Every entity of a kind, across owners.
    All(EntityKind),
    /// Entities of a kind below one owner's parent entity.
    ByParent {
        /// Entity kind.
        kind: EntityKind,
        /// Owner of the parent entity.
        owner_id: UserId,
        /// Parent entity id.
        parent_id: String,
    },
}

impl Query {
    /// Shorthand for [`Query::ByParent`].
    pub fn by_parent(kind: EntityKind, owner_id: UserId, parent_id: impl Into<String>) -> Self {
        Self::ByParent {
            kind,
            owner_id,
            parent_id: parent_id.into(),
        }
    }

    /// The queried kind.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::All(kind) | Self::ByParent { kind, .. } => *kind,
        }
    }

    /// The cache slice this query reads and merges into.
    pub fn scope(&self) -> CacheScope {
        match self {
            Self::All(kind) => CacheScope::All(*kind),
            Self::ByParent {
                kind,
                owner_id,
                parent_id,
            } => CacheScope::Parent {
                kind: *kind,
                owner_id: owner_id.clone(),
                parent_id: parent_id.clone(),
            },
        }
    }
}

impl From<EntityKind> for Query {
    fn from(kind: EntityKind) -> Self {
        Self::All(kind)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All(kind) => write!(f, "{}", kind),
            Self::ByParent {
                kind,
                owner_id,
                parent_id,
            } => write!(f, "users/{}/cities/{}/{}", owner_id, parent_id, kind),
        }
    }
}

#[derive(Clone)]
struct Published {
    query: Query,
    state: DataState<CacheRecord>,
}

/// The sync engine.
pub struct SyncEngine<C, R> {
    cache: Arc<C>,
    remote: Arc<R>,
    config: SyncConfig,
    refreshes: broadcast::Sender<Published>,
}

impl<C, R> Clone for SyncEngine<C, R> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            remote: Arc::clone(&self.remote),
            config: self.config.clone(),
            refreshes: self.refreshes.clone(),
        }
    }
}

impl<C, R> SyncEngine<C, R>
where
    C: CacheStore + 'static,
    R: RemoteStore + 'static,
{
    /// Create an engine over a cache and a remote store.
    pub fn new(cache: Arc<C>, remote: Arc<R>, config: SyncConfig) -> Self {
        let (refreshes, _) = broadcast::channel(config.refresh_capacity.max(1));
        Self {
            cache,
            remote,
            config,
            refreshes,
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The cache this engine writes to.
    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// Subscribe to the data state of a query.
    ///
    /// The first item is `Loading` (empty cache) or a cache-derived
    /// `Success` while the remote fetch runs; the second is the terminal
    /// state of that fetch. The stream then stays open and yields the result
    /// of every later [`refresh`](Self::refresh) of the same query. A cache
    /// failure yields one `Error` without cached items and ends the stream.
    pub fn stream_with_state(
        &self,
        query: impl Into<Query>,
    ) -> impl Stream<Item = DataState<CacheRecord>> + Send + 'static {
        let query = query.into();
        let worker = self.worker(query.clone());
        let mut published = self.refreshes.subscribe();

        async_stream::stream! {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let handle = tokio::spawn(worker.run(CycleStart::Subscribe, tx));

            while let Some(state) = rx.recv().await {
                yield state;
            }

            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::debug!("Closing stream for {} after cache failure: {}", query, err);
                    return;
                }
                Err(err) => {
                    tracing::warn!("Sync task for {} failed: {}", query, err);
                    return;
                }
            }

            loop {
                match published.recv().await {
                    Ok(update) if update.query == query => yield update.state,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Subscription to {} skipped {} refresh results", query, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Typed variant of [`stream_with_state`](Self::stream_with_state).
    ///
    /// Records that do not map to `E` are dropped with a warning.
    pub fn stream_entities<E>(
        &self,
        query: impl Into<Query>,
    ) -> impl Stream<Item = DataState<E>> + Send + 'static
    where
        E: Entity + Send + 'static,
    {
        self.stream_with_state(query).map(|state| {
            state.filter_map(|record| match E::from_record(&record) {
                Ok(entity) => Some(entity),
                Err(err) => {
                    tracing::warn!("Dropping unmappable record {}: {}", record.id, err);
                    None
                }
            })
        })
    }

    /// Fetch, merge and reload eagerly, returning the terminal state.
    ///
    /// The result is also delivered to open subscriptions of the same query.
    pub async fn refresh(
        &self,
        query: impl Into<Query>,
    ) -> Result<DataState<CacheRecord>, EngineError> {
        let query = query.into();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = tokio::spawn(self.worker(query.clone()).run(CycleStart::Refresh, tx))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?;
        outcome?;

        let mut terminal = None;
        while let Ok(state) = rx.try_recv() {
            terminal = Some(state);
        }
        let state = terminal.ok_or_else(|| EngineError::Task("cycle emitted nothing".into()))?;

        // No open subscriptions is fine.
        let _ = self.refreshes.send(Published {
            query,
            state: state.clone(),
        });
        Ok(state)
    }

    /// Number of cached records of a kind.
    pub async fn cached_count(&self, kind: EntityKind) -> Result<u64, EngineError> {
        Ok(self.cache.count(kind).await?)
    }

    /// Wipe every cached record of a kind. Returns the number removed.
    pub async fn invalidate(&self, kind: EntityKind) -> Result<u64, EngineError> {
        let removed = self.cache.delete_all(kind).await?;
        tracing::info!("Invalidated {} cache: {} records removed", kind, removed);
        Ok(removed)
    }

    fn worker(&self, query: Query) -> Worker<C, R> {
        Worker {
            cache: Arc::clone(&self.cache),
            remote: Arc::clone(&self.remote),
            policy: self.config.merge_policy,
            query,
        }
    }
}

enum CycleStart {
    Subscribe,
    Refresh,
}

/// Executes one sync cycle on a detached task.
struct Worker<C, R> {
    cache: Arc<C>,
    remote: Arc<R>,
    policy: MergePolicy,
    query: Query,
}

impl<C: CacheStore, R: RemoteStore> Worker<C, R> {
    /// Drive the cycle to `Settled`, sending every emission to `tx`.
    ///
    /// Returns the cache error that ended the cycle, if any.
    async fn run(
        self,
        start: CycleStart,
        tx: mpsc::UnboundedSender<DataState<CacheRecord>>,
    ) -> Result<(), StorageError> {
        let scope = self.query.scope();
        let mut failure = None;
        let first = match start {
            CycleStart::Refresh => Event::RefreshRequested,
            CycleStart::Subscribe => match self.cache.get_scope(&scope).await {
                Ok(records) => Event::CacheRead { records },
                Err(err) => Self::cache_failed(&mut failure, err),
            },
        };

        let mut cycle = SyncCycle::new();
        let mut events = VecDeque::from([first]);
        while let Some(event) = events.pop_front() {
            let (next, actions) = cycle.on_event(event);
            cycle = next;

            for action in actions {
                match action {
                    Action::Emit(state) => {
                        tracing::debug!("Emitting {:?} state for {}", StateLabel(&state), self.query);
                        // The subscriber may be gone; the cycle still finishes.
                        let _ = tx.send(state);
                    }
                    Action::FetchRemote => events.push_back(self.fetch().await),
                    Action::WriteCache { records } => {
                        if let Err(err) = self.merge(&scope, records).await {
                            events.push_back(Self::cache_failed(&mut failure, err));
                            break;
                        }
                    }
                    Action::ReloadCache => {
                        let event = match self.cache.get_scope(&scope).await {
                            Ok(records) => Event::CacheReloaded { records },
                            Err(err) => Self::cache_failed(&mut failure, err),
                        };
                        events.push_back(event);
                    }
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn cache_failed(
        failure: &mut Option<StorageError>,
        err: StorageError,
    ) -> Event<CacheRecord> {
        tracing::warn!("Cache failure: {}", err);
        let event = Event::CacheFailed {
            message: err.to_string(),
        };
        *failure = Some(err);
        event
    }

    async fn fetch(&self) -> Event<CacheRecord> {
        let kind = self.query.kind();
        let result = match &self.query {
            Query::All(kind) => self.remote.fetch_all(*kind).await,
            Query::ByParent {
                kind,
                owner_id,
                parent_id,
            } => self.remote.fetch_by_parent(*kind, owner_id, parent_id).await,
        };

        let docs = match result {
            Ok(docs) => docs,
            Err(err) => {
                tracing::warn!("Remote fetch for {} failed: {}", self.query, err);
                return Event::RemoteFailed {
                    message: err.to_string(),
                };
            }
        };

        let fetched_at = Utc::now();
        let records: Vec<CacheRecord> = docs
            .iter()
            .filter_map(|doc| match record_from_doc(kind, doc, fetched_at) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!("Skipping remote document {}: {}", doc.path, err);
                    None
                }
            })
            .collect();

        if records.is_empty() {
            tracing::info!(
                "Empty remote result for {}; keeping cached records",
                self.query
            );
        }
        Event::RemoteFetched { records }
    }

    async fn merge(
        &self,
        scope: &CacheScope,
        records: Vec<CacheRecord>,
    ) -> Result<(), StorageError> {
        match self.policy {
            MergePolicy::Replace => {
                let pruned = self.cache.replace_scope(scope, &records).await?;
                tracing::info!(
                    "Merged {} records into {} ({} pruned)",
                    records.len(),
                    scope,
                    pruned
                );
            }
            MergePolicy::Upsert => {
                self.cache.upsert_batch(scope.kind(), &records).await?;
                tracing::info!("Upserted {} records into {}", records.len(), scope);
            }
        }
        Ok(())
    }
}

/// Debug view of a state without its payload.
struct StateLabel<'a, T>(&'a DataState<T>);

impl<T> fmt::Debug for StateLabel<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            DataState::Loading { .. } => f.write_str("Loading"),
            DataState::Success {
                items,
                is_from_cache,
                ..
            } => write!(f, "Success({} items, cache={})", items.len(), is_from_cache),
            DataState::Error { cached_items, .. } => write!(
                f,
                "Error({} cached)",
                cached_items.as_ref().map(Vec::len).unwrap_or(0)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use futures_util::pin_mut;
    use std::time::Duration;
    use sync_core::Location;
    use sync_store::{MemoryCache, SqliteCache};
    use sync_types::{DocPath, Fields, RemoteDoc};

    fn place_doc(owner: &str, city: &str, id: &str) -> RemoteDoc {
        let mut fields = Fields::new();
        fields.insert("name".into(), format!("Place {}", id).into());
        RemoteDoc::new(
            DocPath::new("users", owner)
                .child("cities", city)
                .child("locations", id),
            fields,
        )
    }

    fn place_record(city: &str, id: &str) -> CacheRecord {
        CacheRecord::new(EntityKind::Location, id, UserId::from("alice"))
            .with_parent(city)
            .with_field("name", format!("Place {}", id))
    }

    fn ids(state: &DataState<CacheRecord>) -> Vec<String> {
        state
            .items()
            .map(|items| items.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }

    async fn seeded_cache(records: &[CacheRecord]) -> Arc<MemoryCache> {
        let cache = MemoryCache::new();
        cache
            .upsert_batch(EntityKind::Location, records)
            .await
            .unwrap();
        Arc::new(cache)
    }

    fn engine<C: CacheStore + 'static>(
        cache: Arc<C>,
        remote: &MemoryRemote,
    ) -> SyncEngine<C, MemoryRemote> {
        SyncEngine::new(cache, Arc::new(remote.clone()), SyncConfig::default())
    }

    // ===========================================
    // Cache-first emission
    // ===========================================

    #[tokio::test]
    async fn cached_then_remote() {
        let cache = seeded_cache(&[place_record("paris", "a"), place_record("paris", "b")]).await;
        let remote = MemoryRemote::new();
        for id in ["a", "b", "c"] {
            remote.insert_doc(place_doc("alice", "paris", id));
        }

        let stream = engine(cache, &remote).stream_with_state(EntityKind::Location);
        pin_mut!(stream);

        let first = stream.next().await.unwrap();
        assert!(matches!(
            first,
            DataState::Success {
                is_from_cache: true,
                is_refreshing: true,
                ..
            }
        ));
        assert_eq!(ids(&first), vec!["a", "b"]);

        let second = stream.next().await.unwrap();
        assert!(matches!(
            second,
            DataState::Success {
                is_from_cache: false,
                is_refreshing: false,
                ..
            }
        ));
        assert_eq!(ids(&second), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn empty_cache_and_remote_down() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);

        let stream = engine(Arc::new(MemoryCache::new()), &remote)
            .stream_with_state(EntityKind::Location);
        pin_mut!(stream);

        assert_eq!(
            stream.next().await.unwrap(),
            DataState::Loading {
                is_from_cache: false
            }
        );
        assert!(matches!(
            stream.next().await.unwrap(),
            DataState::Error {
                cached_items: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failure_carries_exactly_the_cached_items() {
        let cache = seeded_cache(&[
            place_record("paris", "a"),
            place_record("paris", "b"),
            place_record("rome", "c"),
        ])
        .await;
        let remote = MemoryRemote::new();
        remote.fail_next_fetch("network down");

        let stream = engine(cache, &remote).stream_with_state(EntityKind::Location);
        pin_mut!(stream);

        stream.next().await.unwrap();
        match stream.next().await.unwrap() {
            DataState::Error {
                message,
                cached_items: Some(items),
            } => {
                assert!(message.contains("network down"));
                let ids: Vec<&str> = items.iter().map(|r| r.id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b", "c"]);
            }
            other => panic!("expected error with cache, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_remote_keeps_cache() {
        let cache = seeded_cache(&[place_record("paris", "a"), place_record("paris", "b")]).await;
        let remote = MemoryRemote::new();

        let stream = engine(Arc::clone(&cache), &remote).stream_with_state(EntityKind::Location);
        pin_mut!(stream);

        stream.next().await.unwrap();
        let settled = stream.next().await.unwrap();
        assert!(matches!(
            settled,
            DataState::Success {
                is_from_cache: true,
                is_refreshing: false,
                ..
            }
        ));
        assert_eq!(ids(&settled), vec!["a", "b"]);
        assert_eq!(cache.count(EntityKind::Location).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stream_stays_open_after_settling() {
        let remote = MemoryRemote::new();
        let stream = engine(Arc::new(MemoryCache::new()), &remote)
            .stream_with_state(EntityKind::City);
        pin_mut!(stream);

        stream.next().await.unwrap();
        stream.next().await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err());
    }

    // ===========================================
    // Merge policy
    // ===========================================

    #[tokio::test]
    async fn replace_makes_cache_equal_remote() {
        let cache = seeded_cache(&[place_record("paris", "a"), place_record("paris", "x")]).await;
        let remote = MemoryRemote::new();
        remote.insert_doc(place_doc("alice", "paris", "a"));
        remote.insert_doc(place_doc("alice", "paris", "b"));

        let engine = engine(Arc::clone(&cache), &remote);
        let state = engine.refresh(EntityKind::Location).await.unwrap();

        assert_eq!(ids(&state), vec!["a", "b"]);
        assert!(cache
            .get_by_id(EntityKind::Location, "x")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn upsert_keeps_absent_rows() {
        let cache = seeded_cache(&[place_record("paris", "x")]).await;
        let remote = MemoryRemote::new();
        remote.insert_doc(place_doc("alice", "paris", "a"));

        let engine = SyncEngine::new(
            Arc::clone(&cache),
            Arc::new(remote),
            SyncConfig::default().with_merge_policy(MergePolicy::Upsert),
        );
        let state = engine.refresh(EntityKind::Location).await.unwrap();

        assert_eq!(ids(&state), vec!["a", "x"]);
    }

    #[tokio::test]
    async fn parent_query_is_scoped_and_denormalized() {
        let cache = seeded_cache(&[place_record("rome", "r")]).await;
        let remote = MemoryRemote::new();
        remote.insert_doc(place_doc("alice", "paris", "a"));
        remote.insert_doc(place_doc("alice", "rome", "r"));
        remote.insert_doc(place_doc("bob", "paris", "z"));

        let engine = engine(Arc::clone(&cache), &remote);
        let query = Query::by_parent(EntityKind::Location, UserId::from("alice"), "paris");
        let state = engine.refresh(query).await.unwrap();

        assert_eq!(ids(&state), vec!["a"]);
        let stored = cache
            .get_by_id(EntityKind::Location, "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.parent_id.as_deref(), Some("paris"));
        assert_eq!(stored.owner_id, UserId::from("alice"));
        // Other parents are untouched by a scoped replace.
        assert_eq!(cache.count(EntityKind::Location).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn parent_replace_spares_other_owner_with_same_parent_id() {
        let bobs = CacheRecord::new(EntityKind::Location, "z", UserId::from("bob"))
            .with_parent("c1");
        let cache = seeded_cache(&[place_record("c1", "stale"), bobs]).await;
        let remote = MemoryRemote::new();
        remote.insert_doc(place_doc("alice", "c1", "a"));

        let engine = engine(Arc::clone(&cache), &remote);
        let query = Query::by_parent(EntityKind::Location, UserId::from("alice"), "c1");
        let state = engine.refresh(query).await.unwrap();

        assert_eq!(ids(&state), vec!["a"]);
        assert!(cache
            .get_by_id(EntityKind::Location, "stale")
            .await
            .unwrap()
            .is_none());
        let kept = cache
            .get_by_id(EntityKind::Location, "z")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.owner_id, UserId::from("bob"));
    }

    // ===========================================
    // Refresh
    // ===========================================

    #[tokio::test]
    async fn refresh_reaches_open_subscription() {
        let remote = MemoryRemote::new();
        let engine = engine(Arc::new(MemoryCache::new()), &remote);

        let stream = engine.stream_with_state(EntityKind::Location);
        pin_mut!(stream);
        stream.next().await.unwrap();
        stream.next().await.unwrap();

        remote.insert_doc(place_doc("alice", "paris", "new"));
        let returned = engine.refresh(EntityKind::Location).await.unwrap();
        assert_eq!(ids(&returned), vec!["new"]);

        let delivered = stream.next().await.unwrap();
        assert_eq!(delivered, returned);
    }

    #[tokio::test]
    async fn refresh_of_other_query_is_not_delivered() {
        let remote = MemoryRemote::new();
        let engine = engine(Arc::new(MemoryCache::new()), &remote);

        let stream = engine.stream_with_state(EntityKind::Location);
        pin_mut!(stream);
        stream.next().await.unwrap();
        stream.next().await.unwrap();

        engine.refresh(EntityKind::City).await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn refresh_failure_degrades_to_cached_error() {
        let cache = seeded_cache(&[place_record("paris", "a")]).await;
        let remote = MemoryRemote::new();
        remote.set_offline(true);

        let state = engine(cache, &remote)
            .refresh(EntityKind::Location)
            .await
            .unwrap();
        assert!(state.is_error());
        assert_eq!(ids(&state), vec!["a"]);
    }

    // ===========================================
    // Cache failures
    // ===========================================

    #[tokio::test]
    async fn closed_cache_ends_stream_with_error() {
        let cache = Arc::new(SqliteCache::in_memory().await.unwrap());
        cache.close().await;
        let remote = MemoryRemote::new();

        let stream = engine(cache, &remote).stream_with_state(EntityKind::Location);
        pin_mut!(stream);

        assert!(matches!(
            stream.next().await.unwrap(),
            DataState::Error {
                cached_items: None,
                ..
            }
        ));
        assert!(stream.next().await.is_none());
        assert_eq!(remote.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn refresh_with_closed_cache_is_hard_error() {
        let cache = Arc::new(MemoryCache::new());
        cache.close().await;
        let remote = MemoryRemote::new();
        remote.insert_doc(place_doc("alice", "paris", "a"));

        let result = engine(cache, &remote).refresh(EntityKind::Location).await;
        assert!(matches!(result, Err(EngineError::Cache(StorageError::Closed))));
    }

    // ===========================================
    // Cancellation
    // ===========================================

    #[tokio::test]
    async fn dropped_subscription_still_merges() {
        let cache = Arc::new(MemoryCache::new());
        let remote = MemoryRemote::new();
        remote.insert_doc(place_doc("alice", "paris", "a"));
        remote.set_fetch_delay(Duration::from_millis(50));

        {
            let stream = engine(Arc::clone(&cache), &remote)
                .stream_with_state(EntityKind::Location);
            pin_mut!(stream);
            stream.next().await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(cache.count(EntityKind::Location).await.unwrap(), 1);
    }

    // ===========================================
    // Counting, invalidation, typed streams
    // ===========================================

    #[tokio::test]
    async fn count_and_invalidate() {
        let cache = seeded_cache(&[place_record("paris", "a"), place_record("paris", "b")]).await;
        let engine = engine(cache, &MemoryRemote::new());

        assert_eq!(engine.cached_count(EntityKind::Location).await.unwrap(), 2);
        assert_eq!(engine.invalidate(EntityKind::Location).await.unwrap(), 2);
        assert_eq!(engine.cached_count(EntityKind::Location).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn typed_stream_maps_locations() {
        let remote = MemoryRemote::new();
        remote.insert_doc(place_doc("alice", "paris", "a"));
        let engine = engine(Arc::new(MemoryCache::new()), &remote);

        let stream = engine.stream_entities::<Location>(EntityKind::Location);
        pin_mut!(stream);

        assert!(matches!(
            stream.next().await.unwrap(),
            DataState::Loading { .. }
        ));
        let settled = stream.next().await.unwrap();
        let items = settled.items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Place a");
        assert_eq!(items[0].city_id, "paris");
    }

    #[tokio::test]
    async fn sqlite_backed_cycle() {
        let cache = Arc::new(SqliteCache::in_memory().await.unwrap());
        let remote = MemoryRemote::new();
        remote.insert_doc(place_doc("alice", "paris", "a"));
        let engine = engine(Arc::clone(&cache), &remote);

        let state = engine.refresh(EntityKind::Location).await.unwrap();
        assert_eq!(ids(&state), vec!["a"]);

        let stream = engine.stream_with_state(EntityKind::Location);
        pin_mut!(stream);
        assert!(matches!(
            stream.next().await.unwrap(),
            DataState::Success {
                is_from_cache: true,
                ..
            }
        ));
    }

    #[test]
    fn query_display_and_scope() {
        let query = Query::by_parent(EntityKind::Review, UserId::from("alice"), "paris");
        assert_eq!(query.to_string(), "users/alice/cities/paris/reviews");
        assert_eq!(
            query.scope(),
            CacheScope::Parent {
                kind: EntityKind::Review,
                owner_id: UserId::from("alice"),
                parent_id: "paris".into()
            }
        );
        assert_eq!(Query::from(EntityKind::City), Query::All(EntityKind::City));
    }
}

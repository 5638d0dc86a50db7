//! # sync-client
//!
//! Offline-first data layer for Waypoint.
//!
//! - [`SyncEngine`] serves entity queries cache-first: cached rows are emitted
//!   at once, a remote fetch runs in the background, and the merged result
//!   follows as a [`DataState`](sync_core::DataState) stream.
//! - [`ConversationManager`] keeps the per-pair conversation aggregate
//!   (participants, last message, unread counters) consistent with the
//!   message log and serves a live roster.
//! - [`remote`] defines what the engine needs from the canonical store, plus
//!   an in-memory implementation.
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{SyncConfig, SyncEngine};
//! use sync_client::remote::MemoryRemote;
//! use sync_store::SqliteCache;
//!
//! let cache = SqliteCache::open("waypoint.db").await?;
//! let engine = SyncEngine::new(Arc::new(cache), Arc::new(MemoryRemote::new()), SyncConfig::default());
//!
//! let mut cities = engine.stream_entities::<City>(EntityKind::City);
//! while let Some(state) = cities.next().await {
//!     render(state);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod conversation;
pub mod engine;
pub mod remote;

pub use conversation::{
    ConversationConfig, ConversationError, ConversationManager, CounterStrategy,
    RosterSubscription, DEFAULT_MAX_ATTEMPTS, DEFAULT_ROSTER_CAPACITY,
};
pub use engine::{
    EngineError, MergePolicy, Query, SyncConfig, SyncEngine, DEFAULT_REFRESH_CAPACITY,
};
pub use remote::{
    ConversationStore, MemoryRemote, ProfileLookup, RemoteError, RemoteSnapshot, RemoteStore,
    Versioned,
};

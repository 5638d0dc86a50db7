//! # sync-store
//!
//! Local cache store for Waypoint sync.
//!
//! The cache is the offline source of truth for presentation code: one keyed
//! table per [`EntityKind`](sync_types::EntityKind), written only by the sync
//! engine's merge step.
//!
//! - [`SqliteCache`] - persistent backend (sqlx, WAL mode)
//! - [`MemoryCache`] - in-process backend for tests and ephemeral sessions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod storage;

pub use error::{StorageError, StorageResult};
pub use storage::{CacheScope, CacheStore, MemoryCache, SqliteCache};

//! Storage layer for sync-store.
//!
//! One keyed table per [`EntityKind`]; rows are returned ordered by id.

mod memory;
mod sqlite;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

use crate::error::StorageError;
use async_trait::async_trait;
use std::fmt;
use sync_types::{CacheRecord, EntityKind, UserId};

/// The slice of a table a query or merge applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// Every row of the kind's table.
    All(EntityKind),
    /// Rows of the kind below one owner's parent entity.
    ///
    /// Parent ids are only unique per owner, so both must match.
    Parent {
        /// Table.
        kind: EntityKind,
        /// Owner of the parent entity.
        owner_id: UserId,
        /// Parent entity id.
        parent_id: String,
    },
}

impl CacheScope {
    /// The table this scope lives in.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::All(kind) | Self::Parent { kind, .. } => *kind,
        }
    }

    /// Check whether a record falls inside this scope.
    pub fn contains(&self, record: &CacheRecord) -> bool {
        match self {
            Self::All(kind) => record.kind == *kind,
            Self::Parent {
                kind,
                owner_id,
                parent_id,
            } => {
                record.kind == *kind
                    && record.owner_id == *owner_id
                    && record.parent_id.as_deref() == Some(parent_id.as_str())
            }
        }
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All(kind) => write!(f, "{}/*", kind),
            Self::Parent {
                kind,
                owner_id,
                parent_id,
            } => write!(f, "{}/owner={}/parent={}", kind, owner_id, parent_id),
        }
    }
}

/// Trait for local cache backends.
///
/// Batch writes are all-or-nothing: either every record lands or none does.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// All rows of a kind.
    async fn get_all(&self, kind: EntityKind) -> Result<Vec<CacheRecord>, StorageError>;

    /// Rows of a kind with the given parent id.
    async fn get_by_parent(
        &self,
        kind: EntityKind,
        parent_id: &str,
    ) -> Result<Vec<CacheRecord>, StorageError>;

    /// A single row, if present.
    async fn get_by_id(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<CacheRecord>, StorageError>;

    /// Insert or overwrite rows by id, in one transaction.
    async fn upsert_batch(
        &self,
        kind: EntityKind,
        records: &[CacheRecord],
    ) -> Result<(), StorageError>;

    /// Upsert `records` and delete every other row inside `scope`, in one
    /// transaction.
    ///
    /// Returns the number of rows removed.
    async fn replace_scope(
        &self,
        scope: &CacheScope,
        records: &[CacheRecord],
    ) -> Result<u64, StorageError>;

    /// Wipe a kind's table. Returns the number of rows removed.
    async fn delete_all(&self, kind: EntityKind) -> Result<u64, StorageError>;

    /// Number of rows of a kind.
    async fn count(&self, kind: EntityKind) -> Result<u64, StorageError>;

    /// Release the underlying resources. Later calls fail with
    /// [`StorageError::Closed`].
    async fn close(&self);

    /// Rows inside a scope.
    async fn get_scope(&self, scope: &CacheScope) -> Result<Vec<CacheRecord>, StorageError> {
        match scope {
            CacheScope::All(kind) => self.get_all(*kind).await,
            CacheScope::Parent {
                kind,
                owner_id,
                parent_id,
            } => {
                let mut rows = self.get_by_parent(*kind, parent_id).await?;
                rows.retain(|record| record.owner_id == *owner_id);
                Ok(rows)
            }
        }
    }
}

pub(crate) fn ensure_kind(kind: EntityKind, records: &[CacheRecord]) -> Result<(), StorageError> {
    match records.iter().find(|r| r.kind != kind) {
        Some(r) => Err(StorageError::KindMismatch {
            id: r.id.clone(),
            expected: kind,
            actual: r.kind,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_contains_by_parent() {
        let scope = CacheScope::Parent {
            kind: EntityKind::Location,
            owner_id: UserId::from("u"),
            parent_id: "paris".into(),
        };
        let inside =
            CacheRecord::new(EntityKind::Location, "a", UserId::from("u")).with_parent("paris");
        let other_parent =
            CacheRecord::new(EntityKind::Location, "b", UserId::from("u")).with_parent("rome");
        let other_kind =
            CacheRecord::new(EntityKind::Review, "c", UserId::from("u")).with_parent("paris");
        let other_owner =
            CacheRecord::new(EntityKind::Location, "d", UserId::from("v")).with_parent("paris");

        assert!(scope.contains(&inside));
        assert!(!scope.contains(&other_parent));
        assert!(!scope.contains(&other_kind));
        assert!(!scope.contains(&other_owner));
        assert!(CacheScope::All(EntityKind::Location).contains(&other_parent));
    }

    #[test]
    fn scope_display() {
        assert_eq!(CacheScope::All(EntityKind::City).to_string(), "cities/*");
        assert_eq!(
            CacheScope::Parent {
                kind: EntityKind::Review,
                owner_id: UserId::from("alice"),
                parent_id: "p1".into()
            }
            .to_string(),
            "reviews/owner=alice/parent=p1"
        );
    }
}

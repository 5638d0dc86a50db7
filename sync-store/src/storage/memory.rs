//! In-memory cache backend.

use super::{ensure_kind, CacheScope, CacheStore};
use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sync_types::{CacheRecord, EntityKind};

type Table = BTreeMap<String, CacheRecord>;

/// In-memory cache storage.
///
/// Each table sits behind its own shard lock, so a batch write to one kind is
/// atomic with respect to readers of that kind. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryCache {
    tables: Arc<DashMap<EntityKind, Table>>,
    closed: Arc<AtomicBool>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn collect(&self, kind: EntityKind, keep: impl Fn(&CacheRecord) -> bool) -> Vec<CacheRecord> {
        self.tables
            .get(&kind)
            .map(|table| table.values().filter(|r| keep(r)).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get_all(&self, kind: EntityKind) -> Result<Vec<CacheRecord>, StorageError> {
        self.check_open()?;
        Ok(self.collect(kind, |_| true))
    }

    async fn get_by_parent(
        &self,
        kind: EntityKind,
        parent_id: &str,
    ) -> Result<Vec<CacheRecord>, StorageError> {
        self.check_open()?;
        Ok(self.collect(kind, |r| r.parent_id.as_deref() == Some(parent_id)))
    }

    async fn get_by_id(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<CacheRecord>, StorageError> {
        self.check_open()?;
        Ok(self
            .tables
            .get(&kind)
            .and_then(|table| table.get(id).cloned()))
    }

    async fn upsert_batch(
        &self,
        kind: EntityKind,
        records: &[CacheRecord],
    ) -> Result<(), StorageError> {
        self.check_open()?;
        ensure_kind(kind, records)?;

        let mut table = self.tables.entry(kind).or_default();
        for record in records {
            table.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn replace_scope(
        &self,
        scope: &CacheScope,
        records: &[CacheRecord],
    ) -> Result<u64, StorageError> {
        self.check_open()?;
        let kind = scope.kind();
        ensure_kind(kind, records)?;

        let mut table = self.tables.entry(kind).or_default();
        let before = table.len();
        table.retain(|id, record| {
            !scope.contains(record) || records.iter().any(|r| &r.id == id)
        });
        let removed = (before - table.len()) as u64;

        for record in records {
            table.insert(record.id.clone(), record.clone());
        }
        Ok(removed)
    }

    async fn delete_all(&self, kind: EntityKind) -> Result<u64, StorageError> {
        self.check_open()?;
        Ok(self
            .tables
            .remove(&kind)
            .map(|(_, table)| table.len() as u64)
            .unwrap_or(0))
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StorageError> {
        self.check_open()?;
        Ok(self
            .tables
            .get(&kind)
            .map(|table| table.len() as u64)
            .unwrap_or(0))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

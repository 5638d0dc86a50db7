//! Wiring shared by every command: the SQLite cache, the snapshot-backed
//! remote, and the engine and conversation manager built over them.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_client::{ConversationManager, MemoryRemote, RemoteSnapshot, SyncEngine};
use sync_store::{CacheStore, SqliteCache};

use crate::config::Config;

/// An opened data directory.
pub struct Session {
    pub cache: Arc<SqliteCache>,
    pub remote: MemoryRemote,
    pub config: Config,
    snapshot_path: PathBuf,
}

impl Session {
    /// Open the cache and load the remote snapshot.
    pub async fn open(data_dir: &Path, config: Config, offline: bool) -> Result<Self> {
        let database = config.database_path(data_dir);
        let cache = SqliteCache::open(&database)
            .await
            .with_context(|| format!("Failed to open cache {}", database.display()))?;

        let snapshot_path = config.snapshot_path(data_dir);
        let remote = MemoryRemote::from_snapshot(load_snapshot(&snapshot_path).await?);
        if offline {
            remote.set_offline(true);
        }
        tracing::debug!(
            "Opened cache {} and remote snapshot {}",
            database.display(),
            snapshot_path.display()
        );

        Ok(Self {
            cache: Arc::new(cache),
            remote,
            config,
            snapshot_path,
        })
    }

    pub fn engine(&self) -> SyncEngine<SqliteCache, MemoryRemote> {
        SyncEngine::new(
            Arc::clone(&self.cache),
            Arc::new(self.remote.clone()),
            self.config.sync_config(),
        )
    }

    pub fn conversations(&self) -> ConversationManager<MemoryRemote, MemoryRemote> {
        ConversationManager::new(
            Arc::new(self.remote.clone()),
            Arc::new(self.remote.clone()),
            self.config.conversation_config(),
        )
    }

    /// Write the remote back to its snapshot file.
    pub async fn save_remote(&self) -> Result<()> {
        save_snapshot(&self.snapshot_path, &self.remote.snapshot()).await
    }

    /// Close the cache pool.
    pub async fn close(self) {
        self.cache.close().await;
    }
}

/// Read a snapshot file; a missing file is an empty remote.
pub async fn load_snapshot(path: &Path) -> Result<RemoteSnapshot> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents)
            .with_context(|| format!("Invalid remote snapshot {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RemoteSnapshot::default()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to read remote snapshot {}", path.display()))
        }
    }
}

/// Write a snapshot file.
pub async fn save_snapshot(path: &Path, snapshot: &RemoteSnapshot) -> Result<()> {
    let contents = serde_json::to_string_pretty(snapshot)?;
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to save remote snapshot {}", path.display()))
}

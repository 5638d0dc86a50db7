//! Initialize a data directory.

use anyhow::{Context, Result};
use std::path::Path;
use sync_store::{CacheStore, SqliteCache};

use crate::config::{Config, CONFIG_FILE};
use crate::session::{load_snapshot, save_snapshot};

/// Run the init command.
pub async fn run(data_dir: &Path, config_path: Option<&Path>) -> Result<()> {
    let config_file = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join(CONFIG_FILE));

    if config_file.exists() {
        anyhow::bail!(
            "Already initialized. Delete {} to reinitialize.",
            config_file.display()
        );
    }

    let config = Config::default();
    tokio::fs::write(&config_file, config.to_toml()?)
        .await
        .context("Failed to save configuration")?;

    // Keep an existing remote snapshot; create an empty one otherwise.
    let snapshot_path = config.snapshot_path(data_dir);
    let snapshot = load_snapshot(&snapshot_path).await?;
    save_snapshot(&snapshot_path, &snapshot).await?;

    let database = config.database_path(data_dir);
    let cache = SqliteCache::open(&database)
        .await
        .with_context(|| format!("Failed to create cache {}", database.display()))?;
    cache.close().await;

    println!("Initialized waypoint data directory");
    println!();
    println!("  Config:   {}", config_file.display());
    println!("  Cache:    {}", database.display());
    println!("  Remote:   {}", snapshot_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Populate the remote snapshot with documents");
    println!("  2. Sync a collection: waypoint sync cities");

    Ok(())
}

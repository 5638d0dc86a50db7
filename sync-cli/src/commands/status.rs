//! Show cache and remote status.

use anyhow::Result;
use std::path::Path;
use sync_store::CacheStore;
use sync_types::EntityKind;

use crate::session::Session;

/// Run the status command.
pub async fn run(session: &Session, data_dir: &Path, offline: bool) -> Result<()> {
    println!("=== waypoint status ===");
    println!();
    println!("Data dir: {}", data_dir.display());
    println!();

    println!("Cache:");
    for kind in EntityKind::ALL {
        let count = session.cache.count(kind).await?;
        println!("  {:<10} {}", kind.to_string(), count);
    }
    println!();

    let snapshot = session.remote.snapshot();
    println!("Remote:");
    println!(
        "  Status:        {}",
        if offline { "OFFLINE" } else { "online" }
    );
    println!("  Documents:     {}", snapshot.documents.len());
    println!("  Conversations: {}", snapshot.conversations.len());
    println!("  Messages:      {}", snapshot.messages.len());
    println!("  Profiles:      {}", snapshot.profiles.len());
    println!();

    let config = &session.config;
    println!("Sync:");
    println!("  Merge policy:     {:?}", config.sync.merge_policy);
    println!(
        "  Counter strategy: {:?}",
        config.conversation_config().counter_strategy
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    #[tokio::test]
    async fn status_on_fresh_directory() {
        let dir = tempdir().unwrap();
        let session = Session::open(dir.path(), Config::default(), false)
            .await
            .unwrap();

        let result = run(&session, dir.path(), false).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn status_while_offline() {
        let dir = tempdir().unwrap();
        let session = Session::open(dir.path(), Config::default(), true)
            .await
            .unwrap();

        let result = run(&session, dir.path(), true).await;
        assert!(result.is_ok());
    }
}

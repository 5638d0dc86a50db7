//! Cache inspection and invalidation.

use anyhow::Result;
use sync_types::EntityKind;

use crate::session::Session;

/// Print the number of cached records of a kind.
pub async fn count(session: &Session, kind: EntityKind) -> Result<()> {
    let count = session.engine().cached_count(kind).await?;
    println!("{}", count);
    Ok(())
}

/// Wipe the cache of a kind.
pub async fn invalidate(session: &Session, kind: EntityKind) -> Result<()> {
    let removed = session.engine().invalidate(kind).await?;
    println!("Removed {} cached {}", removed, kind);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use sync_store::CacheStore;
    use sync_types::{CacheRecord, UserId};
    use tempfile::tempdir;

    #[tokio::test]
    async fn invalidate_empties_kind() {
        let dir = tempdir().unwrap();
        let session = Session::open(dir.path(), Config::default(), false)
            .await
            .unwrap();
        let records = vec![
            CacheRecord::new(EntityKind::City, "c1", UserId::from("alice")),
            CacheRecord::new(EntityKind::City, "c2", UserId::from("alice")),
        ];
        session
            .cache
            .upsert_batch(EntityKind::City, &records)
            .await
            .unwrap();

        count(&session, EntityKind::City).await.unwrap();
        invalidate(&session, EntityKind::City).await.unwrap();

        assert_eq!(session.cache.count(EntityKind::City).await.unwrap(), 0);
    }
}

//! Sync and refresh entity queries.

use anyhow::Result;
use futures_util::StreamExt;
use sync_client::Query;
use sync_types::{EntityKind, UserId};

use super::{describe, print_records};
use crate::session::Session;

/// Build a query from command-line arguments.
pub fn query(kind: EntityKind, owner: Option<String>, parent: Option<String>) -> Result<Query> {
    match (owner, parent) {
        (None, None) => Ok(Query::from(kind)),
        (Some(owner), Some(parent)) => {
            if kind.parent_depth().is_none() {
                anyhow::bail!("{} have no parent; drop --owner and --parent", kind);
            }
            Ok(Query::by_parent(kind, UserId::from(owner), parent))
        }
        _ => anyhow::bail!("--owner and --parent must be given together"),
    }
}

/// Run the sync command: print every state until the cycle settles.
pub async fn run(session: &Session, query: Query) -> Result<()> {
    println!("Syncing {}...", query);

    let engine = session.engine();
    let states = engine.stream_with_state(query);
    futures_util::pin_mut!(states);

    while let Some(state) = states.next().await {
        println!("{}", describe(&state));
        if !state.is_interim() {
            print_records(&state);
            break;
        }
    }

    Ok(())
}

/// Run the refresh command: fetch and merge eagerly, print the result.
pub async fn refresh(session: &Session, query: Query) -> Result<()> {
    println!("Refreshing {}...", query);

    let state = session.engine().refresh(query).await?;
    println!("{}", describe(&state));
    print_records(&state);

    Ok(())
}

//! CLI command implementations.

pub mod cache;
pub mod chat;
pub mod init;
pub mod status;
pub mod sync;

use sync_core::DataState;
use sync_types::CacheRecord;

/// One-line summary of a data state.
pub fn describe(state: &DataState<CacheRecord>) -> String {
    match state {
        DataState::Loading { .. } => "loading".to_string(),
        DataState::Success {
            items,
            is_from_cache,
            is_refreshing,
        } => format!(
            "{} {} record(s){}",
            if *is_from_cache { "cached" } else { "synced" },
            items.len(),
            if *is_refreshing { " (refreshing)" } else { "" }
        ),
        DataState::Error {
            message,
            cached_items,
        } => format!(
            "error: {} ({} cached)",
            message,
            cached_items.as_ref().map_or(0, Vec::len)
        ),
    }
}

/// Print the records a state carries, one per line.
pub fn print_records(state: &DataState<CacheRecord>) {
    for record in state.items().unwrap_or_default() {
        let parent = record.parent_id.as_deref().unwrap_or("-");
        println!(
            "  {}  owner={} parent={}  {}",
            record.id,
            record.owner_id,
            parent,
            serde_json::Value::Object(record.fields.clone())
        );
    }
}

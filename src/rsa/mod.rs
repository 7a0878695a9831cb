//! Reverse-split tracking: the watchlist store, per-user confirmation
//! sessions, and the batch lifecycle reconciliation pass.

pub mod lifecycle;
pub mod session;
pub mod watchlist;

pub use lifecycle::{apply_updates, parse_lifecycle_response, LifecycleUpdate, Notification};
pub use session::SessionTracker;
pub use watchlist::{BrokerState, LifecycleStatus, WatchlistEntry, WatchlistManager};

use std::path::Path;

/// Full-file JSON rewrite via a sibling temp file, renamed into place so a
/// crash mid-write never truncates the store.
pub(crate) fn write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize: {e}"))?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json).map_err(|e| format!("Failed to write {}: {e}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| format!("Failed to rename into {}: {e}", path.display()))
}

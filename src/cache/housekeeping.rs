//! Periodic sweep of expired entries.
//!
//! Expiry is already enforced on read; the sweep only keeps the durable blob
//! from accumulating entries nobody asks for again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::store::CacheStore;

/// Spawn a task calling [`CacheStore::clear_expired`] every `interval`.
///
/// The first sweep happens one interval after spawning. Abort the handle to stop.
pub fn spawn(store: Arc<CacheStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip the first immediate tick
        loop {
            ticker.tick().await;
            let removed = store.clear_expired();
            debug!(removed, remaining = store.size(), "Cache housekeeping pass");
        }
    })
}

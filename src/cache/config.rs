//! Cache store configuration.
//!
//! Controls where the durable mirror lives and how often expired entries are
//! swept, via `[storage]` and `[housekeeping]` in `pagewire.toml`.

use std::time::Duration;

/// Storage key of the persisted blob.
pub const DEFAULT_STORAGE_KEY: &str = "api-cache-v1";
const DEFAULT_HOUSEKEEPING_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Key under which the whole cache map is persisted.
    pub storage_key: String,
    /// Interval of the background `clear_expired` sweep.
    pub housekeeping_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            housekeeping_interval: Duration::from_secs(DEFAULT_HOUSEKEEPING_INTERVAL_SECS),
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            storage_key: settings.storage.storage_key.clone(),
            housekeeping_interval: settings.housekeeping.interval,
        }
    }
}

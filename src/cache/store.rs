//! Persistent TTL cache store.
//!
//! Entries live in an in-memory map that is mirrored, in full, into a
//! [`DurableStorage`] blob after every mutation. Reads never touch storage;
//! storage is only read once, when the store is opened.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::lock::{rw_read, rw_write};
use super::storage::{DurableStorage, MemoryStorage, PersistenceError};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "pagewire_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "pagewire_cache_miss_total";
pub(crate) const METRIC_CACHE_EXPIRED: &str = "pagewire_cache_expired_total";
pub(crate) const METRIC_PERSIST_ERROR: &str = "pagewire_cache_persist_error_total";
pub(crate) const METRIC_CACHE_ENTRIES: &str = "pagewire_cache_entries";

/// Introspection record for one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStats {
    pub key: String,
    pub age_ms: u64,
    pub ttl_ms: u64,
    pub expired: bool,
}

/// Snapshot of the store contents.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub entries: Vec<EntryStats>,
}

/// Process-wide response cache.
///
/// Construct one per process at the composition root and share it as
/// `Arc<CacheStore>`; tests build isolated stores over [`MemoryStorage`].
pub struct CacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    storage: Arc<dyn DurableStorage>,
    clock: Arc<dyn Clock>,
    storage_key: String,
}

impl CacheStore {
    /// Open the store and restore still-valid entries from durable storage.
    pub fn open(
        config: &CacheConfig,
        storage: Arc<dyn DurableStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Self {
            entries: RwLock::new(HashMap::new()),
            storage,
            clock,
            storage_key: config.storage_key.clone(),
        };
        store.restore();
        store
    }

    /// Store with process-local storage and the system clock.
    pub fn in_memory() -> Self {
        Self::open(
            &CacheConfig::default(),
            Arc::new(MemoryStorage::new()),
            Arc::new(SystemClock),
        )
    }

    fn restore(&self) {
        let blob = match self.storage.load(&self.storage_key) {
            Ok(Some(blob)) => blob,
            Ok(None) => return,
            Err(err) => {
                self.report_persist_error("restore", &err);
                return;
            }
        };

        let parsed: serde_json::Map<String, Value> = match serde_json::from_str(&blob) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.report_persist_error("restore", &PersistenceError::Serialize(err));
                return;
            }
        };

        let now = self.clock.now_ms();
        let mut entries = rw_write(&self.entries, SOURCE, "restore");
        let mut skipped = 0usize;
        for (key, raw) in parsed {
            match serde_json::from_value::<CacheEntry>(raw) {
                Ok(entry) if entry.is_valid(now) => {
                    debug!(cache_key = %key, "Restored cache entry");
                    entries.insert(key, entry);
                }
                Ok(_) => skipped += 1,
                Err(err) => {
                    skipped += 1;
                    warn!(
                        op = "restore",
                        cache_key = %key,
                        error = %err,
                        "Discarding malformed persisted cache entry"
                    );
                }
            }
        }

        gauge!(METRIC_CACHE_ENTRIES).set(entries.len() as f64);
        info!(
            restored = entries.len(),
            skipped,
            storage_key = %self.storage_key,
            "Restored cache entries from durable storage"
        );
    }

    fn persist(&self, entries: &HashMap<String, CacheEntry>, op: &'static str) {
        gauge!(METRIC_CACHE_ENTRIES).set(entries.len() as f64);
        let result = serde_json::to_string(entries)
            .map_err(PersistenceError::from)
            .and_then(|blob| self.storage.save(&self.storage_key, &blob));
        if let Err(err) = result {
            self.report_persist_error(op, &err);
        }
    }

    fn report_persist_error(&self, op: &'static str, err: &PersistenceError) {
        counter!(METRIC_PERSIST_ERROR).increment(1);
        warn!(
            op,
            storage_key = %self.storage_key,
            error = %err,
            "Durable cache storage failed; continuing with in-memory state"
        );
    }

    /// Store `value` under `key`, replacing any existing entry.
    ///
    /// A value that cannot be encoded as JSON is logged and not cached.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(value) => self.set_value(key, value, ttl),
            Err(err) => self.report_persist_error("set", &PersistenceError::Serialize(err)),
        }
    }

    pub fn set_value(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry::new(value, self.clock.now_ms(), ttl);
        let mut entries = rw_write(&self.entries, SOURCE, "set");
        entries.insert(key.to_string(), entry);
        self.persist(&entries, "set");
        debug!(cache_key = %key, ttl_ms = ttl.as_millis() as u64, "Cached data");
    }

    /// Decoded copy of the entry at `key`, if present and valid.
    ///
    /// A stored payload that does not decode as `T` is treated as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(
                    op = "get",
                    cache_key = %key,
                    error = %err,
                    "Cached payload does not match the requested type"
                );
                None
            }
        }
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_ms();
        {
            let entries = rw_read(&self.entries, SOURCE, "get");
            match entries.get(key) {
                None => {
                    counter!(METRIC_CACHE_MISS).increment(1);
                    return None;
                }
                Some(entry) if entry.is_valid(now) => {
                    counter!(METRIC_CACHE_HIT).increment(1);
                    return Some(entry.data.clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = rw_write(&self.entries, SOURCE, "get.expire");
        // Re-check under the write lock; a concurrent set may have refreshed the entry.
        match entries.get(key) {
            Some(entry) if entry.is_valid(now) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                Some(entry.data.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.persist(&entries, "get.expire");
                counter!(METRIC_CACHE_EXPIRED).increment(1);
                counter!(METRIC_CACHE_MISS).increment(1);
                debug!(cache_key = %key, "Cache entry expired");
                None
            }
            None => {
                counter!(METRIC_CACHE_MISS).increment(1);
                None
            }
        }
    }

    /// Like [`get`](Self::get), but records no hit or miss and leaves expired
    /// entries in place.
    pub fn peek<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.peek_value(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn peek_value(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_ms();
        rw_read(&self.entries, SOURCE, "peek")
            .get(key)
            .filter(|entry| entry.is_valid(now))
            .map(|entry| entry.data.clone())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get_value(key).is_some()
    }

    /// Remove the entry at `key`. Returns whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "delete");
        let removed = entries.remove(key).is_some();
        self.persist(&entries, "delete");
        removed
    }

    /// Remove every entry and the durable blob.
    pub fn clear(&self) {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        entries.clear();
        gauge!(METRIC_CACHE_ENTRIES).set(0.0);
        if let Err(err) = self.storage.remove(&self.storage_key) {
            self.report_persist_error("clear", &err);
        }
        info!(storage_key = %self.storage_key, "Cache cleared");
    }

    /// Remove entries that fail the validity check. Returns how many were removed.
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = rw_write(&self.entries, SOURCE, "clear_expired");
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));
        let removed = before - entries.len();

        if removed > 0 {
            self.persist(&entries, "clear_expired");
            counter!(METRIC_CACHE_EXPIRED).increment(removed as u64);
            info!(removed, "Cleared expired cache entries");
        }
        removed
    }

    /// Number of entries held in memory, expired or not.
    pub fn size(&self) -> usize {
        rw_read(&self.entries, SOURCE, "size").len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now_ms();
        let entries = rw_read(&self.entries, SOURCE, "stats");
        let mut stats: Vec<EntryStats> = entries
            .iter()
            .map(|(key, entry)| EntryStats {
                key: key.clone(),
                age_ms: entry.age_ms(now),
                ttl_ms: entry.ttl,
                expired: entry.is_expired(now),
            })
            .collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            size: entries.len(),
            entries: stats,
        }
    }

    /// Drop the durable blob while keeping the in-memory entries.
    pub fn force_storage_clear(&self) {
        if let Err(err) = self.storage.remove(&self.storage_key) {
            self.report_persist_error("force_storage_clear", &err);
        }
    }
}

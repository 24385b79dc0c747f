//! Cache entry layout shared by the in-memory map and the durable blob.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached payload with its creation time and time-to-live.
///
/// The serialized form is `{ "data", "timestamp", "ttl" }` with both times in
/// milliseconds, which is also the per-key layout of the persisted blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T = Value> {
    pub data: T,
    /// Creation time in unix milliseconds.
    pub timestamp: i64,
    /// Time-to-live in milliseconds.
    pub ttl: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, timestamp: i64, ttl: Duration) -> Self {
        Self {
            data,
            timestamp,
            ttl: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Milliseconds elapsed since the entry was stored. Clock skew backwards yields zero.
    pub fn age_ms(&self, now_ms: i64) -> u64 {
        u64::try_from(now_ms.saturating_sub(self.timestamp)).unwrap_or(0)
    }

    /// An entry is valid while `now - timestamp <= ttl`.
    pub fn is_valid(&self, now_ms: i64) -> bool {
        self.age_ms(now_ms) <= self.ttl
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        !self.is_valid(now_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn validity_boundary_is_inclusive() {
        let entry = CacheEntry::new(json!(1), 1_000, Duration::from_millis(100));

        assert!(entry.is_valid(1_050));
        assert!(entry.is_valid(1_100));
        assert!(entry.is_expired(1_101));
    }

    #[test]
    fn serialized_layout_matches_blob_format() {
        let entry = CacheEntry::new(json!({"title": "Home"}), 42, Duration::from_secs(5));
        let value = serde_json::to_value(&entry).expect("serialize entry");

        assert_eq!(
            value,
            json!({"data": {"title": "Home"}, "timestamp": 42, "ttl": 5000})
        );
    }
}

//! Response cache
//!
//! Two pieces shared by every client in the process:
//!
//! - **Store**: TTL entries mirrored into durable storage, restored on open
//! - **Coalescer**: at most one in-flight request per cache key
//!
//! ## Configuration
//!
//! ```toml
//! [storage]
//! directory = ".pagewire"
//! persist = true
//!
//! [housekeeping]
//! interval_seconds = 60
//! ```

mod clock;
mod coalesce;
mod config;
mod entry;
pub mod housekeeping;
pub mod keys;
mod lock;
mod storage;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coalesce::{PendingRequest, RequestCoalescer};
pub use config::{CacheConfig, DEFAULT_STORAGE_KEY};
pub use entry::CacheEntry;
pub use keys::QueryParams;
pub use storage::{DurableStorage, FileStorage, MemoryStorage, PersistenceError};
pub use store::{CacheStats, CacheStore, EntryStats};

pub(crate) use coalesce::METRIC_REQUEST_COALESCED;
pub(crate) use lock::{mutex_lock, rw_read, rw_write};
pub(crate) use store::{
    METRIC_CACHE_ENTRIES, METRIC_CACHE_EXPIRED, METRIC_CACHE_HIT, METRIC_CACHE_MISS,
    METRIC_PERSIST_ERROR,
};

//! Cached CMS data layer for the agency website.
//!
//! - [`cache`]: persisted TTL store and in-flight request coalescing
//! - [`client`]: HTTP client that reads through the cache and invalidates on writes
//! - [`swr`]: stale-while-revalidate controller used by page consumers

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod infra;
pub mod swr;

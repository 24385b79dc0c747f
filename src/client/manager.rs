//! Operator-facing cache maintenance over a client's store.

use reqwest::Method;
use tracing::info;

use super::api::CachedApiClient;
use crate::cache::keys::{get_key, page_endpoint, page_key};
use crate::cache::{CacheStats, QueryParams};

#[derive(Clone)]
pub struct CacheManager {
    client: CachedApiClient,
}

impl CacheManager {
    pub fn new(client: CachedApiClient) -> Self {
        Self { client }
    }

    pub fn clear_cache(&self) {
        self.client.clear_cache();
        info!("All cache cleared");
    }

    /// Returns the number of entries removed.
    pub fn clear_expired_cache(&self) -> usize {
        let removed = self.client.store().clear_expired();
        info!(removed, "Expired cache entries cleared");
        removed
    }

    pub fn cache_size(&self) -> usize {
        self.client.store().size()
    }

    /// Drop every entry that may hold the page `slug`.
    pub fn invalidate_page(&self, slug: &str) {
        let endpoint = page_endpoint(slug);
        let store = self.client.store();
        for key in [page_key(slug), endpoint.clone(), get_key(&endpoint)] {
            store.delete(&key);
        }
        info!(slug, "Cache invalidated for page");
    }

    pub fn invalidate_endpoint(&self, endpoint: &str) {
        self.client.invalidate_endpoint(endpoint);
        info!(endpoint, "Cache invalidated for endpoint");
    }

    pub fn has_cached_data(&self, endpoint: &str, params: Option<&QueryParams>) -> bool {
        self.client.has_cached_data(endpoint, params)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.client.cache_stats()
    }

    pub fn cache_key(&self, endpoint: &str, params: Option<&QueryParams>) -> String {
        self.client.cache_key(&Method::GET, endpoint, params, None)
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::histogram;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::RequestError;
use super::options::{CacheOptions, ClientOptions, Interceptors};
use super::transport::{ApiRequest, HttpTransport};
use crate::cache::keys::{endpoint_with_query, get_key, request_key};
use crate::cache::{CacheStats, CacheStore, QueryParams, RequestCoalescer};

pub(crate) const METRIC_REQUEST_MS: &str = "pagewire_request_ms";

/// JSON API client with a shared response cache and request coalescing.
///
/// Cheap to clone; clones share the store, the coalescer and the transport.
#[derive(Clone)]
pub struct CachedApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: String,
    headers: HeaderMap,
    default_cache_time: Duration,
    enable_cache: bool,
    interceptors: Interceptors,
    transport: Arc<dyn HttpTransport>,
    store: Arc<CacheStore>,
    pending: RequestCoalescer<Value>,
    // Bumped by every successful mutation; GETs started under an older value do not store.
    writes: AtomicU64,
}

impl CachedApiClient {
    pub fn new(
        options: ClientOptions,
        transport: Arc<dyn HttpTransport>,
        store: Arc<CacheStore>,
    ) -> Result<Self, RequestError> {
        let ClientOptions {
            base_url,
            headers: extra_headers,
            default_cache_time,
            enable_cache,
            interceptors,
        } = options;

        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|err| RequestError::Url(format!("{base_url}: {err}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.extend(extra_headers);

        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url,
                headers,
                default_cache_time,
                enable_cache,
                interceptors,
                transport,
                store,
                pending: RequestCoalescer::new(),
                writes: AtomicU64::new(0),
            }),
        })
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn cache_enabled(&self) -> bool {
        self.inner.enable_cache
    }

    /// Key under which a request with these parts is cached.
    pub fn cache_key(
        &self,
        method: &Method,
        endpoint: &str,
        params: Option<&QueryParams>,
        body: Option<&str>,
    ) -> String {
        request_key(method, endpoint, params, body)
    }

    /// Cache key a GET with these arguments resolves to.
    pub fn get_cache_key(
        &self,
        endpoint: &str,
        params: Option<&QueryParams>,
        options: &CacheOptions,
    ) -> String {
        options.key.clone().unwrap_or_else(|| {
            let url = endpoint_with_query(endpoint, params);
            request_key(&Method::GET, &url, params, None)
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Option<&QueryParams>,
        options: &CacheOptions,
    ) -> Result<T, RequestError> {
        let value = self.get_value(endpoint, params, options).await?;
        decode(value)
    }

    /// GET as raw JSON.
    ///
    /// A cache hit returns without touching the network. A miss, or a bypass,
    /// joins any request already in flight for the same key.
    pub async fn get_value(
        &self,
        endpoint: &str,
        params: Option<&QueryParams>,
        options: &CacheOptions,
    ) -> Result<Value, RequestError> {
        let url = endpoint_with_query(endpoint, params);
        if !self.caching(options) {
            return self.inner.execute(Method::GET, &url, None).await;
        }

        let key = self.get_cache_key(endpoint, params, options);
        if !options.bypass_cache {
            if let Some(value) = self.inner.store.get_value(&key) {
                debug!(cache_key = %key, "Cache hit");
                return Ok(value);
            }
            debug!(cache_key = %key, "Cache miss; requesting");
        }

        let ttl = options.ttl.unwrap_or(self.inner.default_cache_time);
        let inner = Arc::clone(&self.inner);
        let stored_key = key.clone();
        let request = self.inner.pending.join_or_start(&key, move || async move {
            let writes = inner.writes.load(Ordering::Acquire);
            let value = inner.execute(Method::GET, &url, None).await?;
            if inner.writes.load(Ordering::Acquire) == writes {
                inner.store.set_value(&stored_key, value.clone(), ttl);
                debug!(cache_key = %stored_key, ttl_ms = ttl.as_millis() as u64, "Cached response");
            } else {
                debug!(cache_key = %stored_key, "Write landed during request; response not cached");
            }
            Ok(value)
        });
        request.await
    }

    /// Cached value for a GET, without any network activity.
    ///
    /// Does not count as a cache hit or miss.
    pub fn cached<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Option<&QueryParams>,
        options: &CacheOptions,
    ) -> Option<T> {
        if !self.caching(options) {
            return None;
        }
        self.inner
            .store
            .peek(&self.get_cache_key(endpoint, params, options))
    }

    pub fn has_cached_data(&self, endpoint: &str, params: Option<&QueryParams>) -> bool {
        self.inner.enable_cache
            && self
                .inner
                .store
                .peek_value(&self.get_cache_key(endpoint, params, &CacheOptions::default()))
                .is_some()
    }

    pub async fn post<T, B>(&self, endpoint: &str, data: Option<&B>) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.mutate(Method::POST, endpoint, encode(data)?).await
    }

    pub async fn put<T, B>(&self, endpoint: &str, data: Option<&B>) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.mutate(Method::PUT, endpoint, encode(data)?).await
    }

    pub async fn patch<T, B>(&self, endpoint: &str, data: Option<&B>) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.mutate(Method::PATCH, endpoint, encode(data)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, RequestError> {
        self.mutate(Method::DELETE, endpoint, None).await
    }

    async fn mutate<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<String>,
    ) -> Result<T, RequestError> {
        let value = self.inner.execute(method.clone(), endpoint, body).await?;
        // The store is shared with other clients, so writes invalidate even when
        // this client does not cache.
        self.invalidate_endpoint(endpoint);
        info!(%method, endpoint, "Invalidated cache after write");
        decode(value)
    }

    /// Drop everything that may describe `endpoint`.
    ///
    /// Derived keys embed query strings and bodies, so the GET entry is removed
    /// explicitly and the rest of the cache is cleared with it.
    pub fn invalidate_endpoint(&self, endpoint: &str) {
        self.inner.writes.fetch_add(1, Ordering::AcqRel);
        self.inner.pending.forget_all();
        self.inner.store.delete(&get_key(endpoint));
        self.inner.store.clear();
    }

    pub fn clear_cache(&self) {
        self.inner.store.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    fn caching(&self, options: &CacheOptions) -> bool {
        self.inner.enable_cache && options.enabled != Some(false)
    }
}

impl ClientInner {
    async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<String>,
    ) -> Result<Value, RequestError> {
        let target = format!("{}{}", self.base_url, endpoint);
        let url = Url::parse(&target).map_err(|err| RequestError::Url(format!("{target}: {err}")))?;

        let mut request = ApiRequest {
            method,
            url,
            headers: self.headers.clone(),
            body,
        };
        if let Some(intercept) = &self.interceptors.request {
            request = intercept(request);
        }
        let method = request.method.clone();

        let started = Instant::now();
        let response = self.transport.send(request).await;
        histogram!(METRIC_REQUEST_MS, "method" => method.to_string())
            .record(started.elapsed().as_secs_f64() * 1000.0);

        let mut response = response.map_err(|err| {
            warn!(%method, endpoint, error = %err, "Request failed");
            err
        })?;
        if let Some(intercept) = &self.interceptors.response {
            response = intercept(response);
        }

        if !response.ok() {
            warn!(
                %method,
                endpoint,
                status = response.status,
                "Request rejected"
            );
            return Err(RequestError::status(response.status, response.status_text));
        }

        response.json()
    }
}

fn encode<B: Serialize + ?Sized>(data: Option<&B>) -> Result<Option<String>, RequestError> {
    data.map(serde_json::to_string)
        .transpose()
        .map_err(|err| RequestError::Encode(err.to_string()))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RequestError> {
    serde_json::from_value(value).map_err(|err| RequestError::Decode(err.to_string()))
}

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;

use super::transport::{ApiRequest, ApiResponse};
use crate::config::ClientSettings;

pub const DEFAULT_BASE_URL: &str = "https://cms.1616.marketing";
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(5 * 60);

pub type RequestInterceptor = Arc<dyn Fn(ApiRequest) -> ApiRequest + Send + Sync>;
pub type ResponseInterceptor = Arc<dyn Fn(ApiResponse) -> ApiResponse + Send + Sync>;

/// Hooks applied to every outgoing request and every response before its status is checked.
#[derive(Clone, Default)]
pub struct Interceptors {
    pub request: Option<RequestInterceptor>,
    pub response: Option<ResponseInterceptor>,
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("request", &self.request.is_some())
            .field("response", &self.response.is_some())
            .finish()
    }
}

/// Per-client settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    /// Sent with every request, on top of `Content-Type: application/json`.
    pub headers: HeaderMap,
    pub default_cache_time: Duration,
    pub enable_cache: bool,
    pub interceptors: Interceptors,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            headers: HeaderMap::new(),
            default_cache_time: DEFAULT_CACHE_TIME,
            enable_cache: true,
            interceptors: Interceptors::default(),
        }
    }
}

impl ClientOptions {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl From<&ClientSettings> for ClientOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            headers: settings.headers.clone(),
            default_cache_time: settings.default_cache_time,
            enable_cache: settings.enable_cache,
            interceptors: Interceptors::default(),
        }
    }
}

/// Per-call cache behaviour of a GET.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// `Some(false)` skips the cache and the coalescer for this call.
    pub enabled: Option<bool>,
    /// Lifetime of the stored response; the client default when `None`.
    pub ttl: Option<Duration>,
    /// Explicit cache key instead of the derived one.
    pub key: Option<String>,
    /// Skip the cache read but still store the fresh response.
    pub bypass_cache: bool,
}

impl CacheOptions {
    pub fn bypass() -> Self {
        Self {
            bypass_cache: true,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

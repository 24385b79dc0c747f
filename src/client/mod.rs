//! HTTP client layer.
//!
//! [`CachedApiClient`] sends JSON requests through an [`HttpTransport`], keeps
//! GET responses in the shared [`CacheStore`](crate::cache::CacheStore) and
//! invalidates them after writes.

mod api;
mod error;
mod manager;
mod options;
pub mod pages;
mod transport;

pub use api::CachedApiClient;
pub use error::RequestError;
pub use manager::CacheManager;
pub use options::{
    CacheOptions, ClientOptions, DEFAULT_BASE_URL, DEFAULT_CACHE_TIME, Interceptors,
    RequestInterceptor, ResponseInterceptor,
};
pub use pages::{PageData, PagesApi};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};

pub(crate) use api::METRIC_REQUEST_MS;

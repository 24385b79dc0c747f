use serde::Serialize;

/// Where the data currently shown stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Confirmed by a network round-trip since the last load began.
    Fresh,
    /// Served from the cache, or kept after a failed refresh.
    Stale,
    #[default]
    Empty,
}

/// Observable state of a [`SwrController`](super::SwrController).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchState<T> {
    pub data: Option<T>,
    /// A round-trip is outstanding and no cached data is being shown.
    pub loading: bool,
    /// A refresh of the data already shown is outstanding.
    pub validating: bool,
    pub error: Option<String>,
    pub is_from_cache: bool,
    pub cache_status: CacheStatus,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            validating: false,
            error: None,
            is_from_cache: false,
            cache_status: CacheStatus::Empty,
        }
    }
}

impl<T> FetchState<T> {
    pub fn with_data(data: T) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Data came from the cache or a finished load, as opposed to seeded initial data.
    pub fn holds_loaded_data(&self) -> bool {
        self.data.is_some() && self.cache_status != CacheStatus::Empty
    }

    /// Neither a load nor a background refresh is outstanding.
    pub fn is_settled(&self) -> bool {
        !self.loading && !self.validating
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use metrics::counter;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::state::{CacheStatus, FetchState};
use crate::cache::{QueryParams, rw_read, rw_write};
use crate::client::{CacheOptions, CachedApiClient, RequestError};
use crate::config::SwrSettings;

const SOURCE: &str = "swr::controller";

pub(crate) const METRIC_REVALIDATE_FAILED: &str = "pagewire_revalidate_failed_total";

pub const DEFAULT_REVALIDATE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SwrOptions {
    /// When false, `load` and `refetch` do nothing.
    pub enabled: bool,
    /// TTL for responses stored by this controller; the client default when `None`.
    pub cache_time: Option<Duration>,
    pub stale_while_revalidate: bool,
    /// Pause between serving cached data and starting the background refresh.
    pub revalidate_delay: Duration,
}

impl Default for SwrOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_time: None,
            stale_while_revalidate: true,
            revalidate_delay: DEFAULT_REVALIDATE_DELAY,
        }
    }
}

impl From<&SwrSettings> for SwrOptions {
    fn from(settings: &SwrSettings) -> Self {
        Self {
            stale_while_revalidate: settings.stale_while_revalidate,
            revalidate_delay: settings.revalidate_delay,
            ..Self::default()
        }
    }
}

/// The GET a controller reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub endpoint: String,
    pub params: Option<QueryParams>,
}

impl Resource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = Some(params);
        self
    }
}

/// Stale-while-revalidate reader for one resource.
///
/// State is published through a `watch` channel. Every load takes a new
/// generation; results belonging to an older generation are dropped.
pub struct SwrController<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SwrController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    client: CachedApiClient,
    options: SwrOptions,
    resource: RwLock<Resource>,
    state: watch::Sender<FetchState<T>>,
    generation: AtomicU64,
}

impl<T> SwrController<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(client: CachedApiClient, resource: Resource, options: SwrOptions) -> Self {
        let (state, _) = watch::channel(FetchState::default());
        Self {
            inner: Arc::new(Inner {
                client,
                options,
                resource: RwLock::new(resource),
                state,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Show `data` until the first load replaces it.
    pub fn with_initial_data(self, data: T) -> Self {
        self.inner.state.send_replace(FetchState::with_data(data));
        self
    }

    pub fn state(&self) -> FetchState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.inner.state.borrow().data.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.inner.state.subscribe()
    }

    pub fn resource(&self) -> Resource {
        rw_read(&self.inner.resource, SOURCE, "resource").clone()
    }

    /// Read through the cache.
    ///
    /// With a valid cached entry and stale-while-revalidate on, the cached data
    /// is published before this returns and a background refresh is scheduled.
    /// Without stale-while-revalidate a cached entry is used as is. A miss
    /// waits for the response.
    pub async fn load(&self) {
        if !self.inner.options.enabled {
            return;
        }
        let resource = self.resource();
        let options = self.cache_options();
        let cached = self
            .inner
            .client
            .cached::<T>(&resource.endpoint, resource.params.as_ref(), &options);

        match cached {
            Some(data) if self.inner.options.stale_while_revalidate => {
                let generation = self.begin(|state| {
                    state.data = Some(data);
                    state.loading = false;
                    state.validating = true;
                    state.error = None;
                    state.is_from_cache = true;
                    state.cache_status = CacheStatus::Stale;
                });
                debug!(endpoint = %resource.endpoint, "Using cached data; revalidating");
                Inner::schedule_revalidation(&self.inner, generation, resource);
            }
            Some(data) => {
                self.begin(|state| {
                    state.data = Some(data);
                    state.loading = false;
                    state.validating = false;
                    state.error = None;
                    state.is_from_cache = true;
                    state.cache_status = CacheStatus::Fresh;
                });
                debug!(endpoint = %resource.endpoint, "Using cached data");
            }
            None => self.fetch(resource, options).await,
        }
    }

    /// Reload. A forced refetch skips the cache read; otherwise this is [`load`](Self::load).
    pub async fn refetch(&self, force_refresh: bool) {
        if !force_refresh {
            self.load().await;
            return;
        }
        if !self.inner.options.enabled {
            return;
        }
        let options = CacheOptions {
            bypass_cache: true,
            ..self.cache_options()
        };
        self.fetch(self.resource(), options).await;
    }

    /// Point the controller at another resource and load it.
    ///
    /// Anything still in flight for the previous resource is discarded.
    pub async fn set_resource(&self, resource: Resource) {
        *rw_write(&self.inner.resource, SOURCE, "set_resource") = resource;
        self.begin(|state| *state = FetchState::default());
        self.load().await;
    }

    /// Wait until no load or background refresh is outstanding.
    pub async fn settled(&self) -> FetchState<T> {
        let mut receiver = self.subscribe();
        match receiver.wait_for(FetchState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    // Loaded data stays on screen while the request runs; only an empty or
    // seeded controller reports `loading`.
    async fn fetch(&self, resource: Resource, options: CacheOptions) {
        let generation = self.begin(|state| {
            let showing = state.holds_loaded_data();
            state.loading = !showing;
            state.validating = showing;
            state.error = None;
        });

        let result = self
            .inner
            .client
            .get::<T>(&resource.endpoint, resource.params.as_ref(), &options)
            .await;

        let applied = self.inner.apply(generation, |state| {
            state.loading = false;
            state.validating = false;
            match result {
                Ok(data) => {
                    state.data = Some(data);
                    state.is_from_cache = false;
                    state.cache_status = CacheStatus::Fresh;
                }
                Err(err) => {
                    state.error = Some(err.to_string());
                    if state.holds_loaded_data() {
                        state.is_from_cache = true;
                        state.cache_status = CacheStatus::Stale;
                    }
                }
            }
        });
        if applied {
            debug!(endpoint = %resource.endpoint, forced = options.bypass_cache, "Load finished");
        } else {
            debug!(endpoint = %resource.endpoint, "Discarding result of superseded load");
        }
    }

    fn begin(&self, update: impl FnOnce(&mut FetchState<T>)) -> u64 {
        let mut generation = 0;
        self.inner.state.send_modify(|state| {
            generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
            update(state);
        });
        generation
    }

    fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.inner.options.cache_time,
            ..CacheOptions::default()
        }
    }
}

impl<T> Inner<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    // Generation check and state update happen under the channel's lock, so a
    // load starting concurrently is either fully before or fully after.
    fn apply(&self, generation: u64, update: impl FnOnce(&mut FetchState<T>)) -> bool {
        self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::Acquire) != generation {
                return false;
            }
            update(state);
            true
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn schedule_revalidation(this: &Arc<Self>, generation: u64, resource: Resource) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let delay = this.options.revalidate_delay;
        let options = CacheOptions {
            ttl: this.options.cache_time,
            bypass_cache: true,
            ..CacheOptions::default()
        };

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_current(generation) {
                return;
            }

            let result: Result<T, RequestError> = inner
                .client
                .get(&resource.endpoint, resource.params.as_ref(), &options)
                .await;

            let endpoint = resource.endpoint;
            let applied = match result {
                Ok(data) => inner.apply(generation, |state| {
                    state.data = Some(data);
                    state.validating = false;
                    state.is_from_cache = false;
                    state.cache_status = CacheStatus::Fresh;
                }),
                Err(err) => {
                    counter!(METRIC_REVALIDATE_FAILED).increment(1);
                    warn!(
                        %endpoint,
                        error = %err,
                        "Background validation failed; keeping cached data"
                    );
                    inner.apply(generation, |state| {
                        state.validating = false;
                        state.cache_status = CacheStatus::Stale;
                    })
                }
            };
            if applied {
                info!(%endpoint, "Background validation finished");
            } else {
                debug!(%endpoint, "Discarding result of superseded validation");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::cache::CacheStore;
    use crate::client::{ApiRequest, ApiResponse, ClientOptions, HttpTransport};

    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<ApiResponse>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn replying(responses: impl IntoIterator<Item = ApiResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().collect()),
                ..Self::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, _request: ApiRequest) -> Result<ApiResponse, RequestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .ok_or_else(|| RequestError::Transport("connection refused".into()))
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> CachedApiClient {
        CachedApiClient::new(
            ClientOptions::default().with_base_url("http://cms.test"),
            transport,
            Arc::new(CacheStore::in_memory()),
        )
        .expect("client")
    }

    fn controller(client: &CachedApiClient, endpoint: &str) -> SwrController<Value> {
        SwrController::new(client.clone(), Resource::new(endpoint), SwrOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn cold_load_waits_for_the_network() {
        let transport = ScriptedTransport::replying([ApiResponse::new(200, r#"{"v":1}"#)]);
        let client = client(Arc::clone(&transport));
        let swr = controller(&client, "/api/pages/slug/home");

        swr.load().await;

        let state = swr.state();
        assert_eq!(state.data, Some(json!({"v": 1})));
        assert_eq!(state.cache_status, CacheStatus::Fresh);
        assert!(!state.is_from_cache);
        assert!(state.is_settled());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn warm_load_serves_cache_then_revalidates_once() {
        let transport = ScriptedTransport::replying([
            ApiResponse::new(200, r#"{"v":1}"#),
            ApiResponse::new(200, r#"{"v":2}"#),
        ]);
        let client = client(Arc::clone(&transport));
        controller(&client, "/api/pages/slug/home").load().await;

        let swr = controller(&client, "/api/pages/slug/home");
        swr.load().await;

        let served = swr.state();
        assert_eq!(served.data, Some(json!({"v": 1})));
        assert!(served.is_from_cache);
        assert!(served.validating);
        assert_eq!(served.cache_status, CacheStatus::Stale);
        assert_eq!(transport.calls(), 1);

        let settled = swr.settled().await;
        assert_eq!(settled.data, Some(json!({"v": 2})));
        assert_eq!(settled.cache_status, CacheStatus::Fresh);
        assert!(!settled.is_from_cache);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_revalidation_keeps_cached_data_without_error() {
        let transport = ScriptedTransport::replying([ApiResponse::new(200, r#"{"v":1}"#)]);
        let client = client(Arc::clone(&transport));
        controller(&client, "/api/pages/slug/home").load().await;

        let swr = controller(&client, "/api/pages/slug/home");
        swr.load().await;
        let settled = swr.settled().await;

        assert_eq!(settled.data, Some(json!({"v": 1})));
        assert_eq!(settled.cache_status, CacheStatus::Stale);
        assert_eq!(settled.error, None);
        assert!(!settled.validating);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_refetch_failure_sets_error_but_keeps_data() {
        let transport = ScriptedTransport::replying([ApiResponse::new(200, r#"{"v":1}"#)]);
        let client = client(Arc::clone(&transport));
        let swr = controller(&client, "/api/pages/slug/home");
        swr.load().await;

        swr.refetch(true).await;

        let state = swr.state();
        assert_eq!(state.error.as_deref(), Some("transport error: connection refused"));
        assert_eq!(state.data, Some(json!({"v": 1})));
        assert!(state.is_from_cache);
        assert_eq!(state.cache_status, CacheStatus::Stale);
        assert!(!state.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn cold_failure_reports_error_and_stays_empty() {
        let transport = ScriptedTransport::replying([ApiResponse::new(404, "")]);
        let client = client(Arc::clone(&transport));
        let swr = controller(&client, "/api/pages/slug/missing");

        swr.load().await;

        let state = swr.state();
        assert_eq!(state.error.as_deref(), Some("API Error: 404 Not Found"));
        assert_eq!(state.data, None);
        assert_eq!(state.cache_status, CacheStatus::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn resource_change_discards_pending_validation() {
        let transport = ScriptedTransport::replying([
            ApiResponse::new(200, r#""home v1""#),
            ApiResponse::new(200, r#""about v1""#),
            ApiResponse::new(200, r#""home v2""#),
        ]);
        let client = client(Arc::clone(&transport));
        controller(&client, "/api/pages/slug/home").load().await;

        let swr = controller(&client, "/api/pages/slug/home");
        swr.load().await;
        assert!(swr.state().validating);

        swr.set_resource(Resource::new("/api/pages/slug/about")).await;
        tokio::time::sleep(DEFAULT_REVALIDATE_DELAY * 2).await;

        let state = swr.state();
        assert_eq!(state.data, Some(json!("about v1")));
        assert_eq!(state.cache_status, CacheStatus::Fresh);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_controller_never_fetches() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client(Arc::clone(&transport));
        let swr = SwrController::<Value>::new(
            client,
            Resource::new("/api/pages/slug/home"),
            SwrOptions {
                enabled: false,
                ..SwrOptions::default()
            },
        )
        .with_initial_data(json!("seed"));

        swr.load().await;
        swr.refetch(true).await;

        assert_eq!(swr.data(), Some(json!("seed")));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn without_swr_a_cached_read_is_still_fresh_from_cache() {
        let transport = ScriptedTransport::replying([ApiResponse::new(200, "1")]);
        let client = client(Arc::clone(&transport));
        controller(&client, "/api/counter").load().await;

        let swr = SwrController::<u32>::new(
            client,
            Resource::new("/api/counter"),
            SwrOptions {
                stale_while_revalidate: false,
                ..SwrOptions::default()
            },
        );
        swr.load().await;

        let state = swr.state();
        assert_eq!(state.data, Some(1));
        assert!(state.is_from_cache);
        assert_eq!(state.cache_status, CacheStatus::Fresh);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn params_are_part_of_the_cached_read() {
        let transport = ScriptedTransport::replying([ApiResponse::new(200, "[]")]);
        let client = client(Arc::clone(&transport));
        let mut params = QueryParams::new();
        params.insert("status".into(), json!("published"));

        let swr = SwrController::<Value>::new(
            client.clone(),
            Resource::new("/api/pages").with_params(params.clone()),
            SwrOptions::default(),
        );
        swr.load().await;

        assert_eq!(swr.data(), Some(json!([])));
        assert!(client.has_cached_data("/api/pages", Some(&params)));
        assert!(!client.has_cached_data("/api/pages", None));
    }

    #[tokio::test(start_paused = true)]
    async fn forced_refetch_keeps_cached_data_on_screen() {
        let transport = ScriptedTransport::replying([
            ApiResponse::new(200, r#"{"v":1}"#),
            ApiResponse::new(200, r#"{"v":2}"#),
        ]);
        let client = client(Arc::clone(&transport));
        controller(&client, "/api/pages/slug/home").load().await;
        let swr = SwrController::<Value>::new(
            client.clone(),
            Resource::new("/api/pages/slug/home"),
            SwrOptions {
                stale_while_revalidate: false,
                ..SwrOptions::default()
            },
        );
        swr.load().await;
        let mut updates = swr.subscribe();
        updates.borrow_and_update();

        let observe = async {
            updates.changed().await.expect("controller alive");
            updates.borrow_and_update().clone()
        };
        let ((), during) = tokio::join!(swr.refetch(true), observe);

        assert_eq!(during.data, Some(json!({"v": 1})));
        assert!(!during.loading);
        assert!(during.validating);
        assert!(during.is_from_cache);

        let after = swr.state();
        assert_eq!(after.data, Some(json!({"v": 2})));
        assert!(after.is_settled());
        assert!(!after.is_from_cache);
        assert_eq!(after.cache_status, CacheStatus::Fresh);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_data_is_not_relabelled_as_cached_on_failure() {
        let transport = ScriptedTransport::replying([ApiResponse::new(404, "")]);
        let client = client(Arc::clone(&transport));
        let swr = controller(&client, "/api/pages/slug/missing").with_initial_data(json!("seed"));

        swr.load().await;

        let state = swr.state();
        assert_eq!(state.data, Some(json!("seed")));
        assert_eq!(state.error.as_deref(), Some("API Error: 404 Not Found"));
        assert!(!state.is_from_cache);
        assert_eq!(state.cache_status, CacheStatus::Empty);
        assert_eq!(client.store().size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_forced_refetches_share_one_call() {
        let transport = ScriptedTransport::replying([ApiResponse::new(200, r#"{"v":1}"#)]);
        let client = client(Arc::clone(&transport));
        let swr = controller(&client, "/api/pages/slug/home");

        tokio::join!(swr.refetch(true), swr.refetch(true));

        let state = swr.state();
        assert_eq!(state.data, Some(json!({"v": 1})));
        assert_eq!(state.error, None);
        assert!(state.is_settled());
        assert_eq!(transport.calls(), 1);
    }
}

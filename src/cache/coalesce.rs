//! In-flight request de-duplication.
//!
//! Concurrent callers asking for the same cache key share one underlying
//! request. The request runs as its own task so that it completes (and
//! populates the cache) even if every caller stops waiting.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use tokio::sync::oneshot;
use tracing::debug;

use crate::client::RequestError;

pub(crate) const METRIC_REQUEST_COALESCED: &str = "pagewire_request_coalesced_total";

/// Shareable handle to an in-flight request.
pub type PendingRequest<V> = Shared<BoxFuture<'static, Result<V, RequestError>>>;

struct Registration<V> {
    id: u64,
    handle: PendingRequest<V>,
}

type Registry<V> = Arc<DashMap<String, Registration<V>>>;

/// Registry of in-flight requests keyed by cache key.
pub struct RequestCoalescer<V> {
    pending: Registry<V>,
    next_id: Arc<AtomicU64>,
}

impl<V> Clone for RequestCoalescer<V> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<V> Default for RequestCoalescer<V> {
    fn default() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<V> RequestCoalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the request in flight for `key`, or start one with `factory`.
    ///
    /// `factory` is only invoked when nothing is registered under `key`. The
    /// registration is dropped as soon as the request settles, successfully or
    /// not. Must be called from within a tokio runtime.
    pub fn join_or_start<F, Fut>(&self, key: &str, factory: F) -> PendingRequest<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, RequestError>> + Send + 'static,
    {
        match self.pending.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                counter!(METRIC_REQUEST_COALESCED).increment(1);
                debug!(cache_key = %key, "Request already in flight; joining");
                occupied.get().handle.clone()
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let handle = self.spawn(id, key.to_string(), factory());
                vacant.insert(Registration {
                    id,
                    handle: handle.clone(),
                });
                handle
            }
        }
    }

    // The settle guard removes the entry from the same shard that is still
    // write-locked by the caller's `Entry`, so removal cannot overtake insertion.
    fn spawn<Fut>(&self, id: u64, key: String, request: Fut) -> PendingRequest<V>
    where
        Fut: Future<Output = Result<V, RequestError>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let guard = SettleGuard {
            id,
            key: key.clone(),
            pending: Arc::clone(&self.pending),
        };

        tokio::spawn(async move {
            let result = request.await;
            // Evict first: callers arriving after this point start a new request.
            drop(guard);
            sender.send(result).ok();
        });

        receiver
            .map(move |received| {
                received.unwrap_or_else(|_| Err(RequestError::Abandoned { key }))
            })
            .boxed()
            .shared()
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Detach every in-flight request.
    ///
    /// Callers already waiting still receive their result; later callers start
    /// new requests instead of joining the detached ones.
    pub fn forget_all(&self) {
        self.pending.clear();
    }
}

struct SettleGuard<V> {
    id: u64,
    key: String,
    pending: Registry<V>,
}

impl<V> Drop for SettleGuard<V> {
    fn drop(&mut self) {
        // Only remove our own registration; a detached request must not evict its successor.
        self.pending
            .remove_if(&self.key, |_, registration| registration.id == self.id);
    }
}

//! Stale-while-revalidate reads for consumers.
//!
//! A [`SwrController`] serves a cached response immediately when one is valid,
//! then refreshes it in the background and publishes the outcome as a new
//! [`FetchState`].

mod controller;
mod state;

pub use controller::{DEFAULT_REVALIDATE_DELAY, Resource, SwrController, SwrOptions};
pub use state::{CacheStatus, FetchState};

pub(crate) use controller::METRIC_REVALIDATE_FAILED;

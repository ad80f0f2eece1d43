//! Per-key single-flight for cache fills
//!
//! While a fetch for a key is in flight, every other caller asking for the
//! same key awaits that fetch instead of starting its own. The fetch runs on
//! its own task: a caller giving up does not cancel it, only the configured
//! timeout does. The entry is removed as soon as the fetch settles, so the
//! next miss starts fresh.

use crate::cache::types::CacheKey;
use crate::error::{CacheError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

struct InFlight<T>
where
    T: Clone,
{
    id: u64,
    fetch: SharedFetch<T>,
}

/// Coalesces concurrent fetches of the same key
pub struct StampedeGuard<T>
where
    T: Clone,
{
    in_flight: Arc<DashMap<CacheKey, InFlight<T>>>,
    next_id: AtomicU64,
}

impl<T> StampedeGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Join the fetch in flight for `key`, or start `fetch`, then await it
    ///
    /// `fetch` is only called when no fetch is in flight. All callers of one
    /// fetch get the same outcome. A fetch exceeding `timeout` is cancelled
    /// and fails with [`CacheError::FetchTimeout`].
    pub async fn run<F, Fut>(&self, key: &str, timeout: Option<Duration>, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (shared, _) = self.join_or_start(key, timeout, fetch);
        shared.await
    }

    /// Start `fetch` in the background unless one is already in flight
    ///
    /// Returns `true` when a new fetch was started.
    pub fn spawn<F, Fut>(&self, key: &str, timeout: Option<Duration>, fetch: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (_, started) = self.join_or_start(key, timeout, fetch);
        started
    }

    /// Number of keys currently being fetched
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    fn join_or_start<F, Fut>(&self, key: &str, timeout: Option<Duration>, fetch: F) -> (SharedFetch<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                trace!("Joining in-flight fetch for key: {}", key);
                (entry.get().fetch.clone(), false)
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let in_flight = self.in_flight.clone();
                let task_key = key.to_string();
                let fut = fetch();

                let handle = tokio::spawn(async move {
                    let outcome = match timeout {
                        Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
                            Err(CacheError::FetchTimeout {
                                key: task_key.clone(),
                                timeout_ms: limit.as_millis() as u64,
                            })
                        }),
                        None => fut.await,
                    };

                    // Only our own entry: a later fetch may already own the key
                    in_flight.remove_if(&task_key, |_, current| current.id == id);

                    if let Err(e) = &outcome {
                        debug!("In-flight fetch for {} failed: {}", task_key, e);
                    }
                    outcome
                });

                let join_key = key.to_string();
                let shared = async move {
                    handle.await.unwrap_or_else(|e| {
                        Err(CacheError::StampedeFetchFailed {
                            key: join_key,
                            reason: e.to_string(),
                        })
                    })
                }
                .boxed()
                .shared();

                trace!("Started fetch for key: {}", key);
                entry.insert(InFlight {
                    id,
                    fetch: shared.clone(),
                });
                (shared, true)
            }
        }
    }
}

impl<T> Default for StampedeGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

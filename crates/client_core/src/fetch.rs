//! Freshness-gated fetching of owner-scoped collections.
//!
//! A [`FetchController`] owns the [`FetchState`] of one collection kind (for
//! example the applications of the selected company). Callers ask it to
//! `fetch`; it decides whether the cached collection is still fresh, joins a
//! request that is already in flight, or dispatches a new one to its
//! [`CollectionSource`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{
    future::{BoxFuture, Shared, WeakShared},
    FutureExt,
};
use tracing::{debug, warn};

use crate::{
    error::ClientError,
    freshness::{Clock, FreshnessPolicy},
};

/// Where a controller gets its records from.
#[async_trait]
pub trait CollectionSource: Send + Sync + 'static {
    type Record: Clone + Send + Sync + 'static;

    async fn fetch_collection(&self, owner_key: &str) -> Result<Vec<Self::Record>, ClientError>;
}

#[derive(Debug, Clone)]
pub struct FetchState<T> {
    pub collection: Vec<T>,
    pub loading: bool,
    pub error: Option<ClientError>,
    pub last_fetched: Option<DateTime<Utc>>,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            collection: Vec::new(),
            loading: false,
            error: None,
            last_fetched: None,
        }
    }
}

impl<T> FetchState<T> {
    pub fn is_stale(&self, now: DateTime<Utc>, policy: &FreshnessPolicy) -> bool {
        policy.should_fetch(self.last_fetched, now)
    }
}

type FetchFuture<T> = BoxFuture<'static, Result<Vec<T>, ClientError>>;
type SharedFetch<T> = Shared<FetchFuture<T>>;

/// Identifies one dispatched request. A result is only applied while the
/// generation it was issued under is still the active one.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestToken {
    owner_key: String,
    generation: u64,
    request_id: u64,
}

/// The slot only holds a weak handle, so the request is abandoned once the
/// last caller waiting on it goes away.
struct InFlight<T> {
    request_id: u64,
    future: WeakShared<FetchFuture<T>>,
}

struct Slot<T> {
    owner_key: Option<String>,
    generation: u64,
    next_request_id: u64,
    pending: usize,
    inflight: Option<InFlight<T>>,
    state: FetchState<T>,
}

impl<T> Slot<T> {
    fn switch_owner(&mut self, owner_key: &str) {
        self.owner_key = Some(owner_key.to_string());
        self.generation += 1;
        self.pending = 0;
        self.inflight = None;
        self.state = FetchState::default();
    }
}

enum Plan<T> {
    Cached(Vec<T>),
    Await(SharedFetch<T>),
}

struct Inner<S: CollectionSource> {
    name: &'static str,
    source: Arc<S>,
    policy: FreshnessPolicy,
    clock: Arc<dyn Clock>,
    slot: Mutex<Slot<S::Record>>,
}

pub struct FetchController<S: CollectionSource> {
    inner: Arc<Inner<S>>,
}

impl<S: CollectionSource> Clone for FetchController<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CollectionSource> FetchController<S> {
    pub fn new(
        name: &'static str,
        source: Arc<S>,
        policy: FreshnessPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                source,
                policy,
                clock,
                slot: Mutex::new(Slot {
                    owner_key: None,
                    generation: 0,
                    next_request_id: 0,
                    pending: 0,
                    inflight: None,
                    state: FetchState::default(),
                }),
            }),
        }
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.inner.policy
    }

    pub fn owner_key(&self) -> Option<String> {
        self.lock().owner_key.clone()
    }

    /// Makes `owner_key` the active owner. Switching owners discards the
    /// current state and orphans any request still in flight.
    pub fn select_owner(&self, owner_key: &str) {
        let owner_key = owner_key.trim();
        if owner_key.is_empty() {
            return;
        }
        let mut slot = self.lock();
        if slot.owner_key.as_deref() != Some(owner_key) {
            debug!(collection = self.inner.name, %owner_key, "owner changed");
            slot.switch_owner(owner_key);
        }
    }

    /// Discards the current owner's state and orphans any request in flight;
    /// the owner itself stays selected.
    pub fn reset(&self) {
        let mut slot = self.lock();
        if let Some(owner_key) = slot.owner_key.clone() {
            slot.switch_owner(&owner_key);
        }
    }

    pub fn snapshot(&self) -> FetchState<S::Record> {
        self.lock().state.clone()
    }

    pub fn is_stale(&self) -> bool {
        let now = self.inner.clock.now();
        self.lock().state.is_stale(now, &self.inner.policy)
    }

    /// Forgets when the collection was last fetched so the next non-forced
    /// fetch goes to the source. The collection itself is kept.
    pub fn invalidate(&self) {
        self.lock().state.last_fetched = None;
    }

    /// Returns the collection for `owner_key`, fetching it when stale or when
    /// `force` is set.
    ///
    /// A blank key resolves to an empty collection without touching state.
    /// Non-forced calls share a request that is already in flight. Results
    /// are applied in completion order; a result issued for an owner that is
    /// no longer active is returned to its caller but never applied.
    pub async fn fetch(
        &self,
        owner_key: &str,
        force: bool,
    ) -> Result<Vec<S::Record>, ClientError> {
        let owner_key = owner_key.trim();
        if owner_key.is_empty() {
            debug!(collection = self.inner.name, "fetch skipped: no owner key");
            return Ok(Vec::new());
        }

        match self.plan(owner_key, force) {
            Plan::Cached(collection) => Ok(collection),
            Plan::Await(future) => future.await,
        }
    }

    fn plan(&self, owner_key: &str, force: bool) -> Plan<S::Record> {
        let mut slot = self.lock();
        if slot.owner_key.as_deref() != Some(owner_key) {
            debug!(collection = self.inner.name, %owner_key, "owner changed");
            slot.switch_owner(owner_key);
        }

        if !force {
            let now = self.inner.clock.now();
            if !slot.state.is_stale(now, &self.inner.policy) {
                debug!(collection = self.inner.name, %owner_key, "serving fresh collection");
                return Plan::Cached(slot.state.collection.clone());
            }
            let joined = slot
                .inflight
                .as_ref()
                .and_then(|inflight| inflight.future.upgrade());
            if let Some(future) = joined {
                debug!(collection = self.inner.name, %owner_key, "joining in-flight fetch");
                return Plan::Await(future);
            }
        }

        slot.next_request_id += 1;
        let token = RequestToken {
            owner_key: owner_key.to_string(),
            generation: slot.generation,
            request_id: slot.next_request_id,
        };

        // Whichever caller drives the shared future applies its result.
        let guard = SettleGuard {
            inner: Arc::clone(&self.inner),
            token: Some(token.clone()),
        };
        let key = owner_key.to_string();
        let future = async move {
            let result = guard.inner.source.fetch_collection(&key).await;
            guard.settle(&result);
            result
        }
        .boxed()
        .shared();

        slot.inflight = future.downgrade().map(|weak| InFlight {
            request_id: token.request_id,
            future: weak,
        });
        slot.pending += 1;
        slot.state.loading = true;
        debug!(
            collection = self.inner.name,
            %owner_key,
            request_id = token.request_id,
            force,
            "dispatching fetch"
        );

        Plan::Await(future)
    }

    fn lock(&self) -> MutexGuard<'_, Slot<S::Record>> {
        self.inner.lock()
    }
}

impl<S: CollectionSource> Inner<S> {
    fn lock(&self) -> MutexGuard<'_, Slot<S::Record>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies the outcome of one dispatched request. `None` means the
    /// request was abandoned before it finished.
    fn settle(&self, token: &RequestToken, outcome: Option<&Result<Vec<S::Record>, ClientError>>) {
        let mut slot = self.lock();
        if slot.generation != token.generation {
            debug!(
                collection = self.name,
                owner_key = %token.owner_key,
                request_id = token.request_id,
                "discarding result for inactive owner"
            );
            return;
        }

        slot.pending = slot.pending.saturating_sub(1);
        match outcome {
            Some(Ok(records)) => {
                let now = self.clock.now();
                slot.state.collection = records.clone();
                slot.state.last_fetched = Some(match slot.state.last_fetched {
                    Some(previous) if previous > now => previous,
                    _ => now,
                });
                slot.state.error = None;
            }
            Some(Err(error)) => {
                warn!(
                    collection = self.name,
                    owner_key = %token.owner_key,
                    %error,
                    "fetch failed; keeping previous collection"
                );
                slot.state.error = Some(error.clone());
            }
            None => {
                debug!(
                    collection = self.name,
                    owner_key = %token.owner_key,
                    request_id = token.request_id,
                    "fetch abandoned"
                );
            }
        }
        slot.state.loading = slot.pending > 0;

        if slot
            .inflight
            .as_ref()
            .is_some_and(|inflight| inflight.request_id == token.request_id)
        {
            slot.inflight = None;
        }
    }
}

/// Settles one request exactly once. Dropped unsettled, it reports the
/// request as abandoned; that happens when every caller waiting on the
/// request has gone away, or the source panicked.
struct SettleGuard<S: CollectionSource> {
    inner: Arc<Inner<S>>,
    token: Option<RequestToken>,
}

impl<S: CollectionSource> SettleGuard<S> {
    fn settle(mut self, result: &Result<Vec<S::Record>, ClientError>) {
        if let Some(token) = self.token.take() {
            self.inner.settle(&token, Some(result));
        }
    }
}

impl<S: CollectionSource> Drop for SettleGuard<S> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.inner.settle(&token, None);
        }
    }
}

#[cfg(test)]
#[path = "tests/fetch_tests.rs"]
mod tests;

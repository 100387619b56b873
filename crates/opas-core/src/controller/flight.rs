//! Single-flight registry: at most one in-flight fetch per cache key.
//!
//! Each started flight gets an id. `complete` only removes the entry it is
//! given the id of, so a flight that was dropped from the registry (by
//! `clear`) and finishes late cannot evict the flight that replaced it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::cache::CacheKey;
use crate::error::Result;

pub type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Identifies one started flight within its registry.
pub type FlightId = u64;

struct Flights<T> {
    next_id: FlightId,
    inflight: HashMap<CacheKey, (FlightId, SharedFetch<T>)>,
}

pub struct SingleFlight<T> {
    flights: Mutex<Flights<T>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(Flights {
                next_id: 0,
                inflight: HashMap::new(),
            }),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Flights<T>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the fetch already running for `key`, or build one with `start`.
    ///
    /// `start` receives the new flight's id. Returns the shared future and
    /// whether this call created it. The creator must arrange for the
    /// future to be driven and for `complete(key, id)` to run when it
    /// finishes.
    pub fn join_or_start<F, Fut>(&self, key: &CacheKey, start: F) -> (SharedFetch<T>, bool)
    where
        F: FnOnce(FlightId) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut flights = self.lock();
        if let Some((_, existing)) = flights.inflight.get(key) {
            return (existing.clone(), false);
        }
        flights.next_id += 1;
        let id = flights.next_id;
        let fetch = start(id).boxed().shared();
        flights.inflight.insert(key.clone(), (id, fetch.clone()));
        (fetch, true)
    }

    /// Forget flight `id` for `key`. A newer flight for the key is kept.
    pub fn complete(&self, key: &CacheKey, id: FlightId) {
        let mut flights = self.lock();
        if matches!(flights.inflight.get(key), Some((current, _)) if *current == id) {
            flights.inflight.remove(key);
        }
    }

    /// Detach every running flight so later callers start fresh ones.
    /// Detached flights still run to completion for their existing waiters.
    pub fn clear(&self) -> usize {
        let mut flights = self.lock();
        let dropped = flights.inflight.len();
        flights.inflight.clear();
        dropped
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.lock().inflight.len()
    }
}

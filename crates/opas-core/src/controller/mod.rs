//! Stale-while-revalidate access to registration data.
//!
//! A subscription answers from the cache immediately when it can and
//! always starts a network fetch in the background; subscribers are
//! notified again when the fetch lands. Fetches are single-flight per cache
//! key, and each one holds a ticket so that only the most recently started
//! fetch for a key may write the cache, and never across an invalidation.
//!
//! Mutations (approve, reject, request more info) invalidate the detail
//! entry and the whole listing namespace on success and leave the cache
//! untouched on failure. Fetches already in flight are detached at the same
//! time, so a subscriber arriving after the mutation never joins one.
//!
//! Subscribing spawns tasks and must happen inside a Tokio runtime.

pub mod flight;
pub mod source;
pub mod state;

pub use flight::{SharedFetch, SingleFlight};
pub use source::RegistrationSource;
pub use state::{DataSource, QueryState};

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheNamespace, CacheService, Cached};
use crate::error::Result;
use crate::models::{FilterRepository, Registration, RegistrationFilter, RegistrationPage};
use crate::storage::KeyValueStore;

/// How long fetched data stays valid in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    pub list: Duration,
    pub detail: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(5 * 60),
            detail: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    seq: u64,
    epoch: u64,
}

/// Decides which completed fetch may write the cache: the last one
/// started for its key, provided no invalidation happened since it started.
#[derive(Debug, Default)]
struct TicketBook {
    epoch: u64,
    next_seq: u64,
    latest: HashMap<CacheKey, u64>,
}

impl TicketBook {
    fn issue(&mut self, key: &CacheKey) -> Ticket {
        self.next_seq += 1;
        self.latest.insert(key.clone(), self.next_seq);
        Ticket {
            seq: self.next_seq,
            epoch: self.epoch,
        }
    }

    fn is_current(&self, key: &CacheKey, ticket: Ticket) -> bool {
        ticket.epoch == self.epoch && self.latest.get(key) == Some(&ticket.seq)
    }

    fn invalidate(&mut self) {
        self.epoch += 1;
        self.latest.clear();
    }
}

struct Inner {
    source: Arc<dyn RegistrationSource>,
    cache: CacheService,
    store: Arc<dyn KeyValueStore>,
    ttl: CacheTtl,
    list_flights: SingleFlight<RegistrationPage>,
    detail_flights: SingleFlight<Registration>,
    tickets: Mutex<TicketBook>,
    filter: Mutex<RegistrationFilter>,
}

impl Inner {
    fn tickets(&self) -> MutexGuard<'_, TicketBook> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a fetched value if its ticket is still current.
    fn commit<T: Serialize>(&self, key: &CacheKey, ticket: Ticket, value: &T, ttl: Duration) {
        // Held across the write so an invalidation cannot interleave
        let tickets = self.tickets();
        if !tickets.is_current(key, ticket) {
            debug!(cache = %key, "Discarding superseded fetch result");
            return;
        }
        if let Err(e) = self.cache.set(key, value, ttl) {
            warn!(cache = %key, error = %e, "Failed to cache fetched data");
        }
    }

    fn invalidate_after_mutation(&self, id: i64) {
        let mut tickets = self.tickets();
        tickets.invalidate();
        let detached = self.list_flights.clear() + self.detail_flights.clear();
        if detached > 0 {
            debug!(registration = id, detached, "Detached in-flight fetches");
        }
        if let Err(e) = self.cache.clear(&CacheKey::registration_detail(id)) {
            warn!(registration = id, error = %e, "Failed to clear cached registration");
        }
        match self.cache.clear_namespace(CacheNamespace::RegistrationList) {
            Ok(removed) => debug!(registration = id, removed, "Invalidated registration listings"),
            Err(e) => warn!(registration = id, error = %e, "Failed to clear cached listings"),
        }
    }
}

fn list_flights(inner: &Inner) -> &SingleFlight<RegistrationPage> {
    &inner.list_flights
}

fn detail_flights(inner: &Inner) -> &SingleFlight<Registration> {
    &inner.detail_flights
}

/// Join or start the single fetch for `key`.
///
/// A newly started fetch is spawned so it runs to completion even if
/// every subscriber goes away. The ticket lock is taken before the flight
/// registry, the same order invalidation uses, so a fetch is either joined
/// before an invalidation or started after it.
fn shared_fetch<T, F, Fut>(
    inner: &Arc<Inner>,
    flights: fn(&Inner) -> &SingleFlight<T>,
    key: CacheKey,
    ttl: Duration,
    fetch: F,
) -> SharedFetch<T>
where
    T: Serialize + Clone + Send + Sync + 'static,
    F: FnOnce(Arc<Inner>) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let mut tickets = inner.tickets();
    let (flight, started) = flights(inner).join_or_start(&key, |id| {
        let ticket = tickets.issue(&key);
        let request = fetch(Arc::clone(inner));
        let inner = Arc::clone(inner);
        let key = key.clone();
        async move {
            debug!(cache = %key, "Fetching from network");
            let result = request.await;
            match &result {
                Ok(value) => inner.commit(&key, ticket, value, ttl),
                Err(e) => warn!(cache = %key, error = %e, "Network fetch failed"),
            }
            flights(&inner).complete(&key, id);
            result
        }
    });
    drop(tickets);
    if started {
        tokio::spawn(flight.clone());
    }
    flight
}

#[derive(Clone)]
pub struct RegistrationController {
    inner: Arc<Inner>,
}

impl RegistrationController {
    /// Build a controller, restoring the last used filter from `store`.
    pub fn new(
        source: Arc<dyn RegistrationSource>,
        cache: CacheService,
        store: Arc<dyn KeyValueStore>,
        ttl: CacheTtl,
    ) -> Self {
        let filter = FilterRepository::load(store.as_ref());
        Self {
            inner: Arc::new(Inner {
                source,
                cache,
                store,
                ttl,
                list_flights: SingleFlight::new(),
                detail_flights: SingleFlight::new(),
                tickets: Mutex::new(TicketBook::default()),
                filter: Mutex::new(filter),
            }),
        }
    }

    pub fn cache(&self) -> &CacheService {
        &self.inner.cache
    }

    // =========================================================================
    // Filter state
    // =========================================================================

    pub fn filter(&self) -> RegistrationFilter {
        self.inner.filter.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the current filter and persist it.
    pub fn set_filter(&self, filter: RegistrationFilter) -> RegistrationFilter {
        if let Err(e) = FilterRepository::save(self.inner.store.as_ref(), &filter) {
            warn!(error = %e, "Failed to persist filter");
        }
        *self.inner.filter.lock().unwrap_or_else(PoisonError::into_inner) = filter.clone();
        filter
    }

    pub fn update_filter(
        &self,
        update: impl FnOnce(&RegistrationFilter) -> RegistrationFilter,
    ) -> RegistrationFilter {
        let next = update(&self.filter());
        self.set_filter(next)
    }

    pub fn reset_filter(&self) -> RegistrationFilter {
        self.set_filter(RegistrationFilter::default())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    fn list_flight(&self, filter: &RegistrationFilter) -> SharedFetch<RegistrationPage> {
        let filter = filter.clone();
        shared_fetch(
            &self.inner,
            list_flights,
            CacheKey::registration_list(&filter),
            self.inner.ttl.list,
            move |inner| async move { inner.source.list_registrations(&filter).await },
        )
    }

    fn detail_flight(&self, id: i64) -> SharedFetch<Registration> {
        shared_fetch(
            &self.inner,
            detail_flights,
            CacheKey::registration_detail(id),
            self.inner.ttl.detail,
            move |inner| async move { inner.source.get_registration(id).await },
        )
    }

    /// Publish the flight's outcome to a subscriber channel.
    fn forward<T>(&self, tx: watch::Sender<QueryState<T>>, flight: SharedFetch<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let cache = self.inner.cache.clone();
        tokio::spawn(async move {
            let result = flight.await;
            let now = cache.now();
            tx.send_modify(|state| state.apply(result, now));
        });
    }

    /// Seed a subscriber channel from the cache, then start (or join) the
    /// network fetch.
    fn subscribe<T>(
        &self,
        key: &CacheKey,
        start: impl FnOnce() -> SharedFetch<T>,
    ) -> watch::Receiver<QueryState<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let initial = match self.inner.cache.get_entry::<T>(key) {
            Some(cached) => {
                debug!(cache = %key, "Serving cached data, revalidating");
                QueryState::from_cache(cached)
            }
            None => QueryState::Loading,
        };
        let (tx, rx) = watch::channel(initial);
        self.forward(tx, start());
        rx
    }

    /// Subscribe to a registration listing.
    ///
    /// The receiver starts at `Ready(Cache)` on a cache hit or `Loading`
    /// otherwise, and changes once more when the background fetch lands.
    pub fn subscribe_list(
        &self,
        filter: &RegistrationFilter,
    ) -> watch::Receiver<QueryState<RegistrationPage>> {
        self.subscribe(&CacheKey::registration_list(filter), || self.list_flight(filter))
    }

    pub fn subscribe_detail(&self, id: i64) -> watch::Receiver<QueryState<Registration>> {
        self.subscribe(&CacheKey::registration_detail(id), || self.detail_flight(id))
    }

    pub fn cached_list(&self, filter: &RegistrationFilter) -> Option<Cached<RegistrationPage>> {
        self.inner.cache.get_entry(&CacheKey::registration_list(filter))
    }

    pub fn cached_detail(&self, id: i64) -> Option<Cached<Registration>> {
        self.inner.cache.get_entry(&CacheKey::registration_detail(id))
    }

    /// Fetch a listing from the network (joining any fetch in flight).
    pub async fn fetch_list(&self, filter: &RegistrationFilter) -> Result<RegistrationPage> {
        self.list_flight(filter).await
    }

    pub async fn fetch_detail(&self, id: i64) -> Result<Registration> {
        self.detail_flight(id).await
    }

    /// Cache-first read: a hit returns at once and revalidates in the
    /// background, a miss waits for the network.
    pub async fn load_list(&self, filter: &RegistrationFilter) -> Result<(RegistrationPage, DataSource)> {
        if let Some(cached) = self.cached_list(filter) {
            let _ = self.list_flight(filter);
            return Ok((cached.data, DataSource::Cache));
        }
        Ok((self.fetch_list(filter).await?, DataSource::Network))
    }

    pub async fn load_detail(&self, id: i64) -> Result<(Registration, DataSource)> {
        if let Some(cached) = self.cached_detail(id) {
            let _ = self.detail_flight(id);
            return Ok((cached.data, DataSource::Cache));
        }
        Ok((self.fetch_detail(id).await?, DataSource::Network))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn approve(&self, id: i64, notes: Option<&str>) -> Result<()> {
        self.inner.source.approve_registration(id, notes).await?;
        self.inner.invalidate_after_mutation(id);
        info!(registration = id, "Approval recorded, cache invalidated");
        Ok(())
    }

    pub async fn reject(&self, id: i64, reason: &str) -> Result<()> {
        self.inner.source.reject_registration(id, reason).await?;
        self.inner.invalidate_after_mutation(id);
        info!(registration = id, "Rejection recorded, cache invalidated");
        Ok(())
    }

    pub async fn request_more_info(&self, id: i64, message: &str) -> Result<()> {
        self.inner.source.request_more_info(id, message).await?;
        self.inner.invalidate_after_mutation(id);
        info!(registration = id, "Info request recorded, cache invalidated");
        Ok(())
    }
}

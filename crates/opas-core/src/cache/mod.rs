//! Local caching for offline-first data access.
//!
//! `CacheService` stores JSON payloads in the shared key-value store with a
//! per-entry TTL. Entries are addressed by typed `CacheKey`s grouped into
//! namespaces so a mutation can drop every derived listing at once.
//!
//! The cache is a disposable projection of backend data and can be wiped
//! at any time.

pub mod clock;
pub mod key;
pub mod manager;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{CacheKey, CacheNamespace, CACHE_PREFIX, DETAIL_NAMESPACE, LIST_NAMESPACE};
pub use manager::{age_display, CacheEntry, CacheService, CacheStats, Cached};

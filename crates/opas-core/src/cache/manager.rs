use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage::KeyValueStore;

use super::clock::{Clock, SystemClock};
use super::key::{CacheKey, CacheNamespace, CACHE_PREFIX};

/// A cache entry as persisted in the key-value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: serde_json::Value,
    pub stored_at: DateTime<Utc>,
    pub ttl_ms: i64,
}

impl CacheEntry {
    pub fn ttl(&self) -> Duration {
        Duration::milliseconds(self.ttl_ms)
    }

    /// Valid only while `now - stored_at < ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.stored_at >= self.ttl()
    }
}

/// A decoded cache hit together with when it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub data: T,
    pub stored_at: DateTime<Utc>,
}

impl<T> Cached<T> {
    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        age_display(self.stored_at, now)
    }
}

/// Human-readable age of data stored at `stored_at`, e.g. "5m ago".
pub fn age_display(stored_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - stored_at).num_minutes();
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub expired: usize,
}

/// TTL-aware JSON cache over the shared key-value store.
///
/// Reads fail open: a storage or decode error is logged and reported as a
/// miss so the caller falls through to the network. Reading never extends
/// an entry's lifetime.
#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl CacheService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn read_entry(&self, storage_key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let Some(raw) = self.store.get(storage_key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::serialization(storage_key, &e))
    }

    /// Entry for `key` with its timestamp, if present and not expired.
    pub fn get_entry<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<Cached<T>> {
        let storage_key = key.storage_key();
        let entry = match self.read_entry(&storage_key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(cache = %key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        if entry.is_expired_at(self.clock.now()) {
            debug!(cache = %key, "Cache entry expired");
            if let Err(e) = self.store.remove(&storage_key) {
                debug!(cache = %key, error = %e, "Failed to purge expired entry");
            }
            return None;
        }

        match serde_json::from_value(entry.payload) {
            Ok(data) => Some(Cached {
                data,
                stored_at: entry.stored_at,
            }),
            Err(e) => {
                warn!(cache = %key, error = %e, "Cached payload does not decode, treating as miss");
                None
            }
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.get_entry(key).map(|cached| cached.data)
    }

    /// Store `payload` under `key`, replacing any existing entry.
    pub fn set<T: Serialize>(
        &self,
        key: &CacheKey,
        payload: &T,
        ttl: std::time::Duration,
    ) -> Result<(), StorageError> {
        let storage_key = key.storage_key();
        let payload =
            serde_json::to_value(payload).map_err(|e| StorageError::serialization(&storage_key, &e))?;
        let entry = CacheEntry {
            key: storage_key.clone(),
            payload,
            stored_at: self.clock.now(),
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
        };
        let json =
            serde_json::to_string(&entry).map_err(|e| StorageError::serialization(&storage_key, &e))?;
        self.store.set(&storage_key, &json)?;
        debug!(cache = %key, ttl_secs = ttl.as_secs(), "Cache entry stored");
        Ok(())
    }

    pub fn clear(&self, key: &CacheKey) -> Result<(), StorageError> {
        self.store.remove(&key.storage_key())
    }

    /// Remove every entry whose storage key starts with `prefix`.
    /// Returns how many were removed.
    pub fn clear_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let keys = self.store.keys_with_prefix(prefix)?;
        for key in &keys {
            self.store.remove(key)?;
        }
        debug!(prefix, removed = keys.len(), "Cleared cache namespace");
        Ok(keys.len())
    }

    /// Remove every entry in `namespace`, e.g. all cached listings.
    pub fn clear_namespace(&self, namespace: CacheNamespace) -> Result<usize, StorageError> {
        self.clear_prefix(namespace.prefix())
    }

    pub fn clear_all(&self) -> Result<usize, StorageError> {
        self.clear_prefix(CACHE_PREFIX)
    }

    /// Sweep all cache entries and remove those past their TTL (or
    /// unreadable). Intended to run once at startup.
    pub fn clear_expired(&self) -> Result<usize, StorageError> {
        let now = self.clock.now();
        let mut removed = 0;
        for key in self.store.keys_with_prefix(CACHE_PREFIX)? {
            let expired = match self.read_entry(&key) {
                Ok(Some(entry)) => entry.is_expired_at(now),
                Ok(None) => false,
                Err(e) => {
                    debug!(cache = %key, error = %e, "Removing unreadable cache entry");
                    true
                }
            };
            if expired {
                self.store.remove(&key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats, StorageError> {
        let now = self.clock.now();
        let mut stats = CacheStats::default();
        for key in self.store.keys_with_prefix(CACHE_PREFIX)? {
            stats.entries += 1;
            match self.read_entry(&key) {
                Ok(Some(entry)) if !entry.is_expired_at(now) => {}
                _ => stats.expired += 1,
            }
        }
        Ok(stats)
    }
}

// ============================================================================
// Tests
// ============================================================================

use std::fmt;

use crate::models::RegistrationFilter;

/// Prefix shared by every cache entry in the key-value store
pub const CACHE_PREFIX: &str = "cache:";

/// Namespace of cached registration listings (one entry per filter)
pub const LIST_NAMESPACE: &str = "cache:registrations:list:";

/// Namespace of cached single registrations
pub const DETAIL_NAMESPACE: &str = "cache:registrations:detail:";

/// Group of cache entries that can be dropped together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    RegistrationList,
    RegistrationDetail,
}

impl CacheNamespace {
    /// Storage-key prefix shared by every entry in the namespace.
    pub fn prefix(self) -> &'static str {
        match self {
            CacheNamespace::RegistrationList => LIST_NAMESPACE,
            CacheNamespace::RegistrationDetail => DETAIL_NAMESPACE,
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Typed cache key. Storage keys are only ever built from these.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    RegistrationList(String),
    RegistrationDetail(i64),
}

impl CacheKey {
    pub fn registration_list(filter: &RegistrationFilter) -> Self {
        CacheKey::RegistrationList(filter.signature())
    }

    pub fn registration_detail(id: i64) -> Self {
        CacheKey::RegistrationDetail(id)
    }

    pub fn namespace(&self) -> CacheNamespace {
        match self {
            CacheKey::RegistrationList(_) => CacheNamespace::RegistrationList,
            CacheKey::RegistrationDetail(_) => CacheNamespace::RegistrationDetail,
        }
    }

    pub fn storage_key(&self) -> String {
        match self {
            CacheKey::RegistrationList(signature) => format!("{}{}", self.namespace(), signature),
            CacheKey::RegistrationDetail(id) => format!("{}{}", self.namespace(), id),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

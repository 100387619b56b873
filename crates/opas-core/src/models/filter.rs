//! Filter and pagination state for the registration list.
//!
//! `RegistrationFilter` is a value: every update returns a new filter.
//! Changing any criterion puts the listing back on page 1; only explicit
//! page navigation moves the page.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StorageError;
use crate::storage::KeyValueStore;

use super::RegistrationStatus;

/// Storage key for the persisted registration filter
const FILTER_KEY: &str = "filters:registrations";

const DEFAULT_SORT_BY: &str = "submitted_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn toggled(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationFilter {
    pub status: Option<RegistrationStatus>,
    pub page: u32,
    pub search_query: String,
    pub sort_by: String,
    pub sort_order: SortOrder,
}

impl Default for RegistrationFilter {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            search_query: String::new(),
            sort_by: DEFAULT_SORT_BY.to_string(),
            sort_order: SortOrder::Desc,
        }
    }
}

impl RegistrationFilter {
    pub fn with_status(&self, status: Option<RegistrationStatus>) -> Self {
        Self {
            status,
            page: 1,
            ..self.clone()
        }
    }

    pub fn with_search_query(&self, query: impl Into<String>) -> Self {
        Self {
            search_query: query.into(),
            page: 1,
            ..self.clone()
        }
    }

    pub fn with_sort_by(&self, sort_by: impl Into<String>) -> Self {
        Self {
            sort_by: sort_by.into(),
            page: 1,
            ..self.clone()
        }
    }

    pub fn toggled_sort_order(&self) -> Self {
        Self {
            sort_order: self.sort_order.toggled(),
            page: 1,
            ..self.clone()
        }
    }

    /// Jump to a page. Pages start at 1; 0 is treated as 1.
    pub fn with_page(&self, page: u32) -> Self {
        Self {
            page: page.max(1),
            ..self.clone()
        }
    }

    pub fn next_page(&self) -> Self {
        self.with_page(self.page.saturating_add(1))
    }

    pub fn previous_page(&self) -> Self {
        self.with_page(self.page.saturating_sub(1))
    }

    /// Deterministic identity of the query, used to key cached listings.
    /// The search query is trimmed so `"abc "` and `"abc"` share a cache entry.
    pub fn signature(&self) -> String {
        format!(
            "status={}&q={}&sort={}&order={}&page={}",
            self.status.map(|s| s.as_str()).unwrap_or("all"),
            self.search_query.trim(),
            self.sort_by,
            self.sort_order,
            self.page
        )
    }

    /// Query string parameters for the listing endpoint.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status".to_string(), status.as_str().to_string()));
        }
        let search = self.search_query.trim();
        if !search.is_empty() {
            pairs.push(("search".to_string(), search.to_string()));
        }
        let ordering = match self.sort_order {
            SortOrder::Asc => self.sort_by.clone(),
            SortOrder::Desc => format!("-{}", self.sort_by),
        };
        pairs.push(("ordering".to_string(), ordering));
        pairs.push(("page".to_string(), self.page.to_string()));
        pairs
    }
}

/// Persists the registration filter so a new session resumes where the
/// last one stopped.
pub struct FilterRepository;

impl FilterRepository {
    /// Restore the saved filter, or defaults if none is readable.
    pub fn load(store: &dyn KeyValueStore) -> RegistrationFilter {
        match store.get(FILTER_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<RegistrationFilter>(&json) {
                Ok(filter) => filter.with_page(filter.page),
                Err(e) => {
                    warn!(error = %e, "Saved filter is unreadable, using defaults");
                    RegistrationFilter::default()
                }
            },
            Ok(None) => RegistrationFilter::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read saved filter, using defaults");
                RegistrationFilter::default()
            }
        }
    }

    pub fn save(store: &dyn KeyValueStore, filter: &RegistrationFilter) -> Result<(), StorageError> {
        let json =
            serde_json::to_string(filter).map_err(|e| StorageError::serialization(FILTER_KEY, &e))?;
        store.set(FILTER_KEY, &json)
    }

    pub fn reset(store: &dyn KeyValueStore) -> Result<RegistrationFilter, StorageError> {
        let filter = RegistrationFilter::default();
        Self::save(store, &filter)?;
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_criteria_changes_reset_page() {
        let base = RegistrationFilter::default().with_page(4);
        assert_eq!(base.page, 4);

        assert_eq!(base.with_status(Some(RegistrationStatus::Pending)).page, 1);
        assert_eq!(base.with_search_query("rice").page, 1);
        assert_eq!(base.with_sort_by("seller_name").page, 1);
        assert_eq!(base.toggled_sort_order().page, 1);
        assert_eq!(base.toggled_sort_order().sort_order, SortOrder::Asc);
    }

    #[test]
    fn test_page_navigation() {
        let f = RegistrationFilter::default();
        assert_eq!(f.previous_page().page, 1);
        assert_eq!(f.next_page().next_page().page, 3);
        assert_eq!(f.with_page(0).page, 1);
        // Navigation keeps criteria
        let filtered = f.with_search_query("mango").next_page();
        assert_eq!(filtered.search_query, "mango");
        assert_eq!(filtered.page, 2);
    }

    #[test]
    fn test_updates_do_not_mutate_original() {
        let original = RegistrationFilter::default();
        let _ = original.with_status(Some(RegistrationStatus::Rejected));
        assert_eq!(original, RegistrationFilter::default());
    }

    #[test]
    fn test_same_status_twice_is_idempotent() {
        let store = MemoryStore::new();
        let start = RegistrationFilter::default().with_page(3);

        let once = start.with_status(Some(RegistrationStatus::Approved));
        FilterRepository::save(&store, &once).unwrap();
        let first_json = store.get(FILTER_KEY).unwrap().unwrap();

        let twice = once.with_status(Some(RegistrationStatus::Approved));
        FilterRepository::save(&store, &twice).unwrap();
        let second_json = store.get(FILTER_KEY).unwrap().unwrap();

        assert_eq!(once.page, 1);
        assert_eq!(twice.page, 1);
        assert_eq!(first_json, second_json);
    }

    #[test]
    fn test_signature_distinguishes_queries() {
        let a = RegistrationFilter::default();
        let b = a.with_status(Some(RegistrationStatus::Pending));
        assert_ne!(a.signature(), b.signature());
        assert_eq!(
            a.with_search_query("kale ").signature(),
            a.with_search_query("kale").signature()
        );
        assert_eq!(
            a.signature(),
            "status=all&q=&sort=submitted_at&order=desc&page=1"
        );
    }

    #[test]
    fn test_query_pairs() {
        let f = RegistrationFilter::default()
            .with_status(Some(RegistrationStatus::RequestMoreInfo))
            .with_search_query(" tomato ")
            .toggled_sort_order()
            .with_page(2);
        assert_eq!(
            f.query_pairs(),
            vec![
                ("status".to_string(), "request_more_info".to_string()),
                ("search".to_string(), "tomato".to_string()),
                ("ordering".to_string(), "submitted_at".to_string()),
                ("page".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_repository_roundtrip_and_defaults() {
        let store = MemoryStore::new();
        assert_eq!(FilterRepository::load(&store), RegistrationFilter::default());

        let saved = RegistrationFilter::default().with_search_query("cacao").next_page();
        FilterRepository::save(&store, &saved).unwrap();
        assert_eq!(FilterRepository::load(&store), saved);

        store.set(FILTER_KEY, "not json").unwrap();
        assert_eq!(FilterRepository::load(&store), RegistrationFilter::default());

        let reset = FilterRepository::reset(&store).unwrap();
        assert_eq!(reset, RegistrationFilter::default());
        assert_eq!(FilterRepository::load(&store), reset);
    }
}

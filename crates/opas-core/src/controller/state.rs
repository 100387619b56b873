use chrono::{DateTime, Utc};

use crate::cache::Cached;
use crate::error::{OpasError, Result};

/// Where a `Ready` value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Cache,
    Network,
}

/// Lifecycle of one query as seen by its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
    Empty,
    Loading,
    Ready {
        value: T,
        source: DataSource,
        updated_at: DateTime<Utc>,
    },
    Error {
        error: OpasError,
        last_known_good: Option<T>,
    },
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        QueryState::Empty
    }
}

impl<T> QueryState<T> {
    pub fn from_cache(cached: Cached<T>) -> Self {
        QueryState::Ready {
            value: cached.data,
            source: DataSource::Cache,
            updated_at: cached.stored_at,
        }
    }

    /// The freshest value available, including the last good one behind an error.
    pub fn value(&self) -> Option<&T> {
        match self {
            QueryState::Ready { value, .. } => Some(value),
            QueryState::Error { last_known_good, .. } => last_known_good.as_ref(),
            QueryState::Empty | QueryState::Loading => None,
        }
    }

    pub fn source(&self) -> Option<DataSource> {
        match self {
            QueryState::Ready { source, .. } => Some(*source),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }

    pub fn error(&self) -> Option<&OpasError> {
        match self {
            QueryState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Fold a network result into the state.
    ///
    /// Success always wins. A failure keeps a `Ready` value in place and
    /// otherwise becomes `Error`, carrying forward any last good value.
    pub(crate) fn apply(&mut self, result: Result<T>, now: DateTime<Utc>) {
        match result {
            Ok(value) => {
                *self = QueryState::Ready {
                    value,
                    source: DataSource::Network,
                    updated_at: now,
                };
            }
            Err(error) => {
                *self = match std::mem::take(self) {
                    ready @ QueryState::Ready { .. } => ready,
                    QueryState::Error { last_known_good, .. } => QueryState::Error {
                        error,
                        last_known_good,
                    },
                    QueryState::Empty | QueryState::Loading => QueryState::Error {
                        error,
                        last_known_good: None,
                    },
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_error() -> OpasError {
        OpasError::Network("timeout".to_string())
    }

    #[test]
    fn test_success_replaces_any_state() {
        let now = Utc::now();
        let mut state = QueryState::Loading;
        state.apply(Ok(1), now);
        assert_eq!(state.value(), Some(&1));
        assert_eq!(state.source(), Some(DataSource::Network));

        let mut errored = QueryState::Error {
            error: network_error(),
            last_known_good: Some(0),
        };
        errored.apply(Ok(2), now);
        assert_eq!(errored.value(), Some(&2));
    }

    #[test]
    fn test_failure_keeps_cached_value() {
        let now = Utc::now();
        let mut state = QueryState::from_cache(Cached {
            data: 5,
            stored_at: now,
        });
        state.apply(Err(network_error()), now);
        assert_eq!(state.source(), Some(DataSource::Cache));
        assert_eq!(state.value(), Some(&5));
        assert!(state.error().is_none());
    }

    #[test]
    fn test_failure_without_value_is_error() {
        let mut state: QueryState<i32> = QueryState::Loading;
        state.apply(Err(network_error()), Utc::now());
        assert_eq!(state.error(), Some(&network_error()));
        assert_eq!(state.value(), None);
    }

    #[test]
    fn test_repeated_failure_carries_last_known_good() {
        let mut state = QueryState::Error {
            error: network_error(),
            last_known_good: Some(3),
        };
        state.apply(Err(OpasError::RateLimited), Utc::now());
        assert_eq!(state.error(), Some(&OpasError::RateLimited));
        assert_eq!(state.value(), Some(&3));
    }
}

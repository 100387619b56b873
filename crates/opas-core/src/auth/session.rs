use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage::KeyValueStore;

/// Storage key for the persisted session
const SESSION_KEY: &str = "auth:session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub username: String,
    pub issued_at: DateTime<Utc>,
}

/// The current session, mirrored into the key-value store.
///
/// Cheap to clone; clones share the same session. Persistence failures
/// are logged and otherwise ignored: the in-memory session stays usable.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    data: Arc<RwLock<Option<SessionData>>>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            data: Arc::new(RwLock::new(None)),
        }
    }

    /// Restore the session saved by a previous run. Returns whether one was found.
    pub fn load(&self) -> bool {
        let loaded = match self.store.get(SESSION_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<SessionData>(&json) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(error = %e, "Saved session is unreadable, ignoring it");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read saved session");
                None
            }
        };
        let found = loaded.is_some();
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        debug!(found, "Session loaded");
        found
    }

    pub fn current(&self) -> Option<SessionData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|d| d.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|d| d.refresh_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.data.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Replace the session and persist it.
    pub fn update(&self, data: SessionData) {
        if let Err(e) = self.persist(&data) {
            warn!(error = %e, "Failed to persist session");
        }
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = Some(data);
    }

    /// Swap in a refreshed access token, keeping the rest of the session.
    pub fn rotate(&self, access_token: String, refresh_token: Option<String>) {
        let updated = {
            let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
            guard.as_ref().map(|d| SessionData {
                access_token,
                refresh_token: refresh_token.or_else(|| d.refresh_token.clone()),
                username: d.username.clone(),
                issued_at: Utc::now(),
            })
        };
        if let Some(data) = updated {
            self.update(data);
        }
    }

    pub fn clear(&self) {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = None;
        if let Err(e) = self.store.remove(SESSION_KEY) {
            warn!(error = %e, "Failed to remove saved session");
        }
    }

    fn persist(&self, data: &SessionData) -> Result<(), StorageError> {
        let json =
            serde_json::to_string(data).map_err(|e| StorageError::serialization(SESSION_KEY, &e))?;
        self.store.set(SESSION_KEY, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn session(token: &str) -> SessionData {
        SessionData {
            access_token: token.to_string(),
            refresh_token: Some("refresh-1".to_string()),
            username: "admin@opas.ph".to_string(),
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn test_session_persists_across_stores() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = SessionStore::new(kv.clone());
        first.update(session("access-1"));

        let second = SessionStore::new(kv);
        assert!(!second.is_authenticated());
        assert!(second.load());
        assert_eq!(second.access_token().as_deref(), Some("access-1"));
    }

    #[test]
    fn test_rotate_keeps_refresh_token_when_not_reissued() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()));
        store.update(session("access-1"));
        store.rotate("access-2".to_string(), None);
        assert_eq!(store.access_token().as_deref(), Some("access-2"));
        assert_eq!(store.refresh_token().as_deref(), Some("refresh-1"));

        store.rotate("access-3".to_string(), Some("refresh-2".to_string()));
        assert_eq!(store.refresh_token().as_deref(), Some("refresh-2"));
    }

    #[test]
    fn test_rotate_without_session_is_noop() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()));
        store.rotate("access".to_string(), None);
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_clear_removes_persisted_session() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let store = SessionStore::new(kv.clone());
        store.update(session("access-1"));
        store.clear();
        assert!(!store.is_authenticated());
        assert!(!SessionStore::new(kv).load());
    }

    #[test]
    fn test_unreadable_session_is_ignored() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        kv.set(SESSION_KEY, "{broken").unwrap();
        let store = SessionStore::new(kv);
        assert!(!store.load());
    }
}

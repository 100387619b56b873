//! Wiring for a client session: one key-value store shared by the cache,
//! the saved session, the persisted filter and the notification history.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{AdminApi, ApiClient, ReqwestTransport, Transport};
use crate::auth::SessionStore;
use crate::cache::CacheService;
use crate::config::Config;
use crate::controller::RegistrationController;
use crate::error::Result;
use crate::notifications::NotificationHistory;
use crate::storage::{FileStore, KeyValueStore};

pub struct AdminContext {
    pub config: Config,
    pub store: Arc<dyn KeyValueStore>,
    pub cache: CacheService,
    pub session: SessionStore,
    pub api: AdminApi,
    pub registrations: RegistrationController,
    pub notifications: NotificationHistory,
}

impl AdminContext {
    /// Open the file store under the configured data directory and build
    /// the client on top of it.
    pub fn bootstrap(config: Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        debug!(?data_dir, "Data directory configured");
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(data_dir)?);
        let transport = ReqwestTransport::new(std::time::Duration::from_secs(
            config.request_timeout_secs,
        ))?;
        Ok(Self::assemble(config, store, Arc::new(transport)))
    }

    /// Build the client over an existing store and transport.
    ///
    /// Expired cache entries are swept and any saved session is restored.
    pub fn assemble(config: Config, store: Arc<dyn KeyValueStore>, transport: Arc<dyn Transport>) -> Self {
        let cache = CacheService::new(store.clone());
        match cache.clear_expired() {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Swept expired cache entries"),
            Err(e) => warn!(error = %e, "Failed to sweep expired cache entries"),
        }

        let session = SessionStore::new(store.clone());
        session.load();

        let client = ApiClient::with_transport(&config.api_base_url, transport, session.clone());
        let api = AdminApi::new(client, config.decode_mode);
        let registrations = RegistrationController::new(
            Arc::new(api.clone()),
            cache.clone(),
            store.clone(),
            config.cache_ttl(),
        );
        let notifications = NotificationHistory::new(store.clone());

        Self {
            config,
            store,
            cache,
            session,
            api,
            registrations,
            notifications,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedTransport;
    use crate::cache::{CacheKey, ManualClock};
    use crate::controller::DataSource;
    use crate::models::RegistrationFilter;
    use crate::storage::MemoryStore;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_assemble_sweeps_expired_entries() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now() - Duration::hours(2)));
        let old = CacheService::with_clock(store.clone(), clock);
        old.set(&CacheKey::registration_detail(1), &"stale", std::time::Duration::from_secs(60))
            .unwrap();

        let ctx = AdminContext::assemble(Config::default(), store.clone(), Arc::new(ScriptedTransport::new()));
        assert_eq!(ctx.cache.stats().unwrap().entries, 0);
        assert!(!ctx.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_then_list() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(200, r#"{"access": "a1", "refresh": "r1"}"#);
        transport.push(
            200,
            r#"{"count": 1, "results": [{"id": 5, "seller_name": "Ana Cruz", "status": "pending",
                "submitted_at": "2025-03-01T08:00:00Z"}]}"#,
        );
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ctx = AdminContext::assemble(Config::default(), store.clone(), transport.clone());

        ctx.api.client().login("admin", "secret").await.unwrap();
        let filter = RegistrationFilter::default();
        let (page, from) = ctx.registrations.load_list(&filter).await.unwrap();
        assert_eq!(from, DataSource::Network);
        assert_eq!(page.items[0].seller_name, "Ana Cruz");
        assert_eq!(transport.requests()[1].bearer.as_deref(), Some("a1"));

        // A second context over the same store resumes the session
        let resumed = AdminContext::assemble(Config::default(), store, Arc::new(ScriptedTransport::new()));
        assert!(resumed.session.is_authenticated());
        assert!(resumed.registrations.cached_list(&filter).is_some());
    }
}

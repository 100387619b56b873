//! Local notification history.
//!
//! Admin notifications are kept locally (newest first, capped) so they can
//! be read offline. The server stays authoritative for registration status:
//! `sync` merges the server feed, then looks up every registration still
//! under review and `reconcile`s the history against what it finds.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::controller::RegistrationSource;
use crate::error::{Result, StorageError};
use crate::models::{Notification, Registration};
use crate::storage::KeyValueStore;

/// Storage key for the notification history
const HISTORY_KEY: &str = "notifications:history";

/// Maximum number of notifications kept locally.
const MAX_HISTORY_SIZE: usize = 100;

/// Server-side notification feed.
#[async_trait]
pub trait NotificationFeed: Send + Sync {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    /// Entries whose status changed after looking up their registration
    pub reconciled: usize,
}

pub struct NotificationHistory {
    store: Arc<dyn KeyValueStore>,
    // Serializes read-modify-write cycles on the stored history
    lock: Mutex<()>,
}

impl NotificationHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// All stored notifications, newest first. Unreadable history is empty.
    pub fn list(&self) -> Vec<Notification> {
        match self.store.get(HISTORY_KEY) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(error = %e, "Notification history is unreadable, starting fresh");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read notification history");
                Vec::new()
            }
        }
    }

    pub fn unread_count(&self) -> usize {
        self.list().iter().filter(|n| !n.read).count()
    }

    fn save(&self, mut history: Vec<Notification>) -> std::result::Result<(), StorageError> {
        history.sort_by(|a, b| b.received_at.cmp(&a.received_at).then(b.id.cmp(&a.id)));
        history.truncate(MAX_HISTORY_SIZE);
        let json = serde_json::to_string(&history)
            .map_err(|e| StorageError::serialization(HISTORY_KEY, &e))?;
        self.store.set(HISTORY_KEY, &json)
    }

    /// Run `f` over the stored history and persist the result.
    fn modify<R>(&self, f: impl FnOnce(&mut Vec<Notification>) -> R) -> R {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut history = self.list();
        let result = f(&mut history);
        if let Err(e) = self.save(history) {
            warn!(error = %e, "Failed to persist notification history");
        }
        result
    }

    /// Add a notification, replacing any stored one with the same id.
    pub fn record(&self, notification: Notification) {
        self.modify(|history| {
            history.retain(|n| n.id != notification.id);
            history.push(notification);
        });
    }

    /// Returns whether a notification with `id` was found.
    pub fn mark_read(&self, id: i64) -> bool {
        self.modify(|history| match history.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        })
    }

    pub fn mark_all_read(&self) -> usize {
        self.modify(|history| {
            let mut changed = 0;
            for n in history.iter_mut().filter(|n| !n.read) {
                n.read = true;
                changed += 1;
            }
            changed
        })
    }

    pub fn clear(&self) -> std::result::Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.remove(HISTORY_KEY)
    }

    /// Pull server-side registration status into local history entries.
    ///
    /// Entries whose registration now has a different status take the new
    /// status and become unread again. Returns how many changed.
    pub fn reconcile(&self, registrations: &[Registration]) -> usize {
        let statuses: HashMap<i64, _> = registrations.iter().map(|r| (r.id, r.status)).collect();
        let changed = self.modify(|history| {
            let mut changed = 0;
            for n in history.iter_mut() {
                let Some(reg_id) = n.registration_id else {
                    continue;
                };
                if let Some(&status) = statuses.get(&reg_id) {
                    if n.status != Some(status) {
                        debug!(notification = n.id, registration = reg_id, %status, "Status changed on server");
                        n.status = Some(status);
                        n.read = false;
                        changed += 1;
                    }
                }
            }
            changed
        });
        if changed > 0 {
            info!(changed, "Reconciled notification history");
        }
        changed
    }

    /// Merge the server feed into local history, then reconcile it with
    /// the current status of every registration that is not final yet.
    ///
    /// New ids are added as delivered. Known ids keep their local read flag
    /// unless the server marks them read, and take the server's status; a
    /// status change makes the entry unread. A registration that cannot be
    /// looked up is skipped, except on an auth failure, which is returned.
    pub async fn sync(
        &self,
        feed: &dyn NotificationFeed,
        source: &dyn RegistrationSource,
    ) -> Result<SyncSummary> {
        let remote = feed.fetch_notifications().await?;
        let mut summary = self.merge(remote);

        let mut current = Vec::new();
        for id in self.open_registrations() {
            match source.get_registration(id).await {
                Ok(registration) => current.push(registration),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => warn!(registration = id, error = %e, "Skipping registration lookup"),
            }
        }
        summary.reconciled = self.reconcile(&current);

        info!(
            added = summary.added,
            updated = summary.updated,
            reconciled = summary.reconciled,
            "Notification history synced"
        );
        Ok(summary)
    }

    /// Registrations referenced by history whose status may still change.
    fn open_registrations(&self) -> BTreeSet<i64> {
        self.list()
            .iter()
            .filter(|n| !n.status.is_some_and(|s| s.is_final()))
            .filter_map(|n| n.registration_id)
            .collect()
    }

    fn merge(&self, remote: Vec<Notification>) -> SyncSummary {
        self.modify(|history| {
            let mut summary = SyncSummary::default();
            for incoming in remote {
                match history.iter_mut().find(|n| n.id == incoming.id) {
                    Some(local) => {
                        let status_changed = incoming.status.is_some() && local.status != incoming.status;
                        if status_changed {
                            local.status = incoming.status;
                            local.read = false;
                            summary.updated += 1;
                        } else if incoming.read && !local.read {
                            local.read = true;
                            summary.updated += 1;
                        }
                    }
                    None => {
                        history.push(incoming);
                        summary.added += 1;
                    }
                }
            }
            summary
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpasError;
    use crate::models::{RegistrationFilter, RegistrationPage, RegistrationStatus};
    use crate::storage::MemoryStore;
    use chrono::{Duration, Utc};

    fn notification(id: i64, registration_id: i64, status: RegistrationStatus) -> Notification {
        Notification {
            id,
            registration_id: Some(registration_id),
            title: format!("Registration {}", registration_id),
            body: String::new(),
            status: Some(status),
            received_at: Utc::now() + Duration::seconds(id),
            read: false,
        }
    }

    fn registration(id: i64, status: RegistrationStatus) -> Registration {
        Registration {
            id,
            seller_name: "Seller".to_string(),
            farm_name: None,
            status,
            submitted_at: Utc::now(),
            reviewed_at: None,
            rejection_reason: None,
            approval_notes: None,
            info_request: None,
        }
    }

    struct FixedFeed(Vec<Notification>);

    #[async_trait]
    impl NotificationFeed for FixedFeed {
        async fn fetch_notifications(&self) -> Result<Vec<Notification>> {
            Ok(self.0.clone())
        }
    }

    /// Registration lookups answered from a fixed table.
    struct Registrations {
        statuses: HashMap<i64, RegistrationStatus>,
        lookups: Mutex<Vec<i64>>,
        error: Option<OpasError>,
    }

    impl Registrations {
        fn new(statuses: &[(i64, RegistrationStatus)]) -> Self {
            Self {
                statuses: statuses.iter().copied().collect(),
                lookups: Mutex::new(Vec::new()),
                error: None,
            }
        }

        fn failing(error: OpasError) -> Self {
            Self {
                error: Some(error),
                ..Self::new(&[])
            }
        }

        fn lookups(&self) -> Vec<i64> {
            self.lookups.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RegistrationSource for Registrations {
        async fn list_registrations(&self, _filter: &RegistrationFilter) -> Result<RegistrationPage> {
            Err(OpasError::Network("not used".to_string()))
        }

        async fn get_registration(&self, id: i64) -> Result<Registration> {
            self.lookups.lock().unwrap().push(id);
            if let Some(ref error) = self.error {
                return Err(error.clone());
            }
            match self.statuses.get(&id) {
                Some(&status) => Ok(registration(id, status)),
                None => Err(OpasError::NotFound(format!("registration {}", id))),
            }
        }

        async fn approve_registration(&self, _id: i64, _notes: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn reject_registration(&self, _id: i64, _reason: &str) -> Result<()> {
            Ok(())
        }

        async fn request_more_info(&self, _id: i64, _message: &str) -> Result<()> {
            Ok(())
        }
    }

    struct DownFeed;

    #[async_trait]
    impl NotificationFeed for DownFeed {
        async fn fetch_notifications(&self) -> Result<Vec<Notification>> {
            Err(OpasError::Network("connection refused".to_string()))
        }
    }

    fn history() -> NotificationHistory {
        NotificationHistory::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_record_orders_newest_first_and_dedupes() {
        let h = history();
        h.record(notification(1, 10, RegistrationStatus::Pending));
        h.record(notification(2, 11, RegistrationStatus::Pending));
        h.record(notification(1, 10, RegistrationStatus::Approved));

        let list = h.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, 2);
        assert_eq!(list[1].status, Some(RegistrationStatus::Approved));
    }

    #[test]
    fn test_history_is_capped() {
        let h = history();
        for id in 0..(MAX_HISTORY_SIZE as i64 + 5) {
            h.record(notification(id, id, RegistrationStatus::Pending));
        }
        let list = h.list();
        assert_eq!(list.len(), MAX_HISTORY_SIZE);
        // Oldest were dropped
        assert!(list.iter().all(|n| n.id >= 5));
    }

    #[test]
    fn test_mark_read() {
        let h = history();
        h.record(notification(1, 10, RegistrationStatus::Pending));
        h.record(notification(2, 11, RegistrationStatus::Pending));
        assert_eq!(h.unread_count(), 2);

        assert!(h.mark_read(1));
        assert!(!h.mark_read(99));
        assert_eq!(h.unread_count(), 1);

        assert_eq!(h.mark_all_read(), 1);
        assert_eq!(h.unread_count(), 0);
    }

    #[test]
    fn test_reconcile_updates_changed_statuses() {
        let h = history();
        h.record(notification(1, 10, RegistrationStatus::Pending));
        h.record(notification(2, 11, RegistrationStatus::Pending));
        h.mark_all_read();

        let changed = h.reconcile(&[
            registration(10, RegistrationStatus::Approved),
            registration(11, RegistrationStatus::Pending),
            registration(12, RegistrationStatus::Rejected),
        ]);
        assert_eq!(changed, 1);

        let list = h.list();
        let first = list.iter().find(|n| n.id == 1).unwrap();
        assert_eq!(first.status, Some(RegistrationStatus::Approved));
        assert!(!first.read);
        assert!(list.iter().find(|n| n.id == 2).unwrap().read);

        assert_eq!(h.reconcile(&[registration(10, RegistrationStatus::Approved)]), 0);
    }

    #[tokio::test]
    async fn test_sync_merges_feed() {
        let h = history();
        h.record(notification(1, 10, RegistrationStatus::Pending));
        h.mark_all_read();

        let mut server_copy = notification(1, 10, RegistrationStatus::Rejected);
        server_copy.read = true;
        let feed = FixedFeed(vec![server_copy, notification(2, 11, RegistrationStatus::Pending)]);
        let source = Registrations::new(&[
            (10, RegistrationStatus::Rejected),
            (11, RegistrationStatus::Approved),
        ]);

        let summary = h.sync(&feed, &source).await.unwrap();
        assert_eq!(
            summary,
            SyncSummary {
                added: 1,
                updated: 1,
                reconciled: 1
            }
        );
        // Rejected is final, so only the pending registration is looked up
        assert_eq!(source.lookups(), vec![11]);

        let list = h.list();
        assert_eq!(list.len(), 2);
        let updated = list.iter().find(|n| n.id == 1).unwrap();
        assert_eq!(updated.status, Some(RegistrationStatus::Rejected));
        assert!(!updated.read);
        let reconciled = list.iter().find(|n| n.id == 2).unwrap();
        assert_eq!(reconciled.status, Some(RegistrationStatus::Approved));
    }

    #[tokio::test]
    async fn test_sync_skips_failed_lookups() {
        let h = history();
        h.record(notification(1, 10, RegistrationStatus::Pending));
        h.record(notification(2, 11, RegistrationStatus::RequestMoreInfo));
        let source = Registrations::new(&[(11, RegistrationStatus::Rejected)]);

        let summary = h.sync(&FixedFeed(Vec::new()), &source).await.unwrap();
        assert_eq!(summary.reconciled, 1);
        assert_eq!(source.lookups(), vec![10, 11]);
        let list = h.list();
        assert_eq!(list.iter().find(|n| n.id == 1).unwrap().status, Some(RegistrationStatus::Pending));
    }

    #[tokio::test]
    async fn test_sync_stops_on_auth_failure() {
        let h = history();
        h.record(notification(1, 10, RegistrationStatus::Pending));
        h.record(notification(2, 11, RegistrationStatus::Pending));
        let source = Registrations::failing(OpasError::Auth("session expired".to_string()));

        let err = h.sync(&FixedFeed(Vec::new()), &source).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(source.lookups(), vec![10]);
    }

    #[tokio::test]
    async fn test_sync_failure_leaves_history() {
        let h = history();
        h.record(notification(1, 10, RegistrationStatus::Pending));
        assert!(h.sync(&DownFeed, &Registrations::new(&[])).await.is_err());
        assert_eq!(h.list().len(), 1);
    }

    #[test]
    fn test_clear() {
        let h = history();
        h.record(notification(1, 10, RegistrationStatus::Pending));
        h.clear().unwrap();
        assert!(h.list().is_empty());
    }
}

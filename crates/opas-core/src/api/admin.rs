//! Admin endpoints: seller registration review and notifications.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::controller::RegistrationSource;
use crate::error::{OpasError, ParseError, Result};
use crate::models::{
    DecodeMode, Notification, NotificationDto, Registration, RegistrationDto, RegistrationFilter,
    RegistrationPage,
};
use crate::notifications::NotificationFeed;

use super::ApiClient;

const REGISTRATIONS_PATH: &str = "/admin/sellers/registrations/";

const NOTIFICATIONS_PATH: &str = "/admin/notifications/";

#[derive(Clone)]
pub struct AdminApi {
    client: ApiClient,
    decode_mode: DecodeMode,
}

impl AdminApi {
    pub fn new(client: ApiClient, decode_mode: DecodeMode) -> Self {
        Self { client, decode_mode }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    fn registration_path(id: i64, action: Option<&str>) -> String {
        match action {
            Some(action) => format!("{}{}/{}/", REGISTRATIONS_PATH, id, action),
            None => format!("{}{}/", REGISTRATIONS_PATH, id),
        }
    }

    fn require_text(field: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(OpasError::Validation(format!("A {} is required", field)));
        }
        Ok(())
    }

    pub async fn list_registrations(&self, filter: &RegistrationFilter) -> Result<RegistrationPage> {
        let text = self
            .client
            .get_text(REGISTRATIONS_PATH, filter.query_pairs())
            .await?;
        let page = RegistrationPage::decode(&text, filter.page, self.decode_mode)?;
        debug!(count = page.items.len(), total = page.total, page = page.page, "Registrations fetched");
        Ok(page)
    }

    pub async fn get_registration(&self, id: i64) -> Result<Registration> {
        let text = self
            .client
            .get_text(&Self::registration_path(id, None), Vec::new())
            .await?;
        let dto: RegistrationDto = serde_json::from_str(&text).map_err(ParseError::from)?;
        Ok(dto.into_registration(self.decode_mode)?)
    }

    pub async fn approve_registration(&self, id: i64, notes: Option<&str>) -> Result<()> {
        let body = match notes {
            Some(notes) if !notes.trim().is_empty() => serde_json::json!({ "approval_notes": notes }),
            _ => serde_json::json!({}),
        };
        self.client
            .post_text(&Self::registration_path(id, Some("approve")), body)
            .await?;
        info!(registration = id, "Registration approved");
        Ok(())
    }

    pub async fn reject_registration(&self, id: i64, reason: &str) -> Result<()> {
        Self::require_text("rejection reason", reason)?;
        self.client
            .post_text(
                &Self::registration_path(id, Some("reject")),
                serde_json::json!({ "rejection_reason": reason }),
            )
            .await?;
        info!(registration = id, "Registration rejected");
        Ok(())
    }

    pub async fn request_more_info(&self, id: i64, message: &str) -> Result<()> {
        Self::require_text("message", message)?;
        self.client
            .post_text(
                &Self::registration_path(id, Some("request-info")),
                serde_json::json!({ "message": message }),
            )
            .await?;
        info!(registration = id, "More information requested");
        Ok(())
    }

    pub async fn list_notifications(&self) -> Result<Vec<Notification>> {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(default, alias = "notifications", alias = "data")]
            results: Vec<NotificationDto>,
        }

        let text = self.client.get_text(NOTIFICATIONS_PATH, Vec::new()).await?;
        let dtos = match serde_json::from_str::<Vec<NotificationDto>>(&text) {
            Ok(list) => list,
            Err(_) => serde_json::from_str::<Wrapper>(&text)
                .map_err(ParseError::from)?
                .results,
        };

        let mut notifications = Vec::with_capacity(dtos.len());
        for dto in dtos {
            match (dto.into_notification(self.decode_mode), self.decode_mode) {
                (Ok(n), _) => notifications.push(n),
                (Err(e), DecodeMode::Strict) => return Err(e.into()),
                (Err(e), DecodeMode::Lenient) => warn!(error = %e, "Skipping undecodable notification"),
            }
        }
        Ok(notifications)
    }
}

#[async_trait]
impl RegistrationSource for AdminApi {
    async fn list_registrations(&self, filter: &RegistrationFilter) -> Result<RegistrationPage> {
        AdminApi::list_registrations(self, filter).await
    }

    async fn get_registration(&self, id: i64) -> Result<Registration> {
        AdminApi::get_registration(self, id).await
    }

    async fn approve_registration(&self, id: i64, notes: Option<&str>) -> Result<()> {
        AdminApi::approve_registration(self, id, notes).await
    }

    async fn reject_registration(&self, id: i64, reason: &str) -> Result<()> {
        AdminApi::reject_registration(self, id, reason).await
    }

    async fn request_more_info(&self, id: i64, message: &str) -> Result<()> {
        AdminApi::request_more_info(self, id, message).await
    }
}

#[async_trait]
impl NotificationFeed for AdminApi {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>> {
        self.list_notifications().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedTransport;
    use crate::api::transport::Method;
    use crate::auth::{SessionData, SessionStore};
    use crate::models::RegistrationStatus;
    use crate::storage::MemoryStore;
    use chrono::Utc;
    use std::sync::Arc;

    fn admin(transport: Arc<ScriptedTransport>) -> AdminApi {
        let session = SessionStore::new(Arc::new(MemoryStore::new()));
        session.update(SessionData {
            access_token: "t".to_string(),
            refresh_token: None,
            username: "admin".to_string(),
            issued_at: Utc::now(),
        });
        let client = ApiClient::with_transport("https://api.test/api", transport, session);
        AdminApi::new(client, DecodeMode::Strict)
    }

    #[tokio::test]
    async fn test_list_registrations_sends_filter() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            200,
            r#"{"count": 1, "results": [{"id": 3, "seller_name": "Ana", "status": "pending",
                "submitted_at": "2024-06-01T00:00:00Z"}]}"#,
        );
        let api = admin(transport.clone());
        let filter = RegistrationFilter::default()
            .with_status(Some(RegistrationStatus::Pending))
            .next_page();

        let page = api.list_registrations(&filter).await.unwrap();
        assert_eq!(page.items[0].seller_name, "Ana");
        assert_eq!(page.page, 2);

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "https://api.test/api/admin/sellers/registrations/");
        assert!(sent.query.contains(&("status".to_string(), "pending".to_string())));
        assert!(sent.query.contains(&("page".to_string(), "2".to_string())));
    }

    #[tokio::test]
    async fn test_get_registration_strict_parse_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(200, r#"{"id": 3, "seller_name": "Ana"}"#);
        let api = admin(transport);

        let err = api.get_registration(3).await.unwrap_err();
        assert!(matches!(err, OpasError::Parse(ParseError::MissingField(_))));
    }

    #[tokio::test]
    async fn test_mutation_paths_and_bodies() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(200, "{}");
        transport.push(200, "{}");
        transport.push(200, "{}");
        let api = admin(transport.clone());

        api.approve_registration(7, Some("All good")).await.unwrap();
        api.reject_registration(7, "Blurry permit").await.unwrap();
        api.request_more_info(7, "Upload barangay clearance").await.unwrap();

        let sent = transport.requests();
        assert!(sent.iter().all(|r| r.method == Method::Post));
        assert_eq!(sent[0].url, "https://api.test/api/admin/sellers/registrations/7/approve/");
        assert_eq!(sent[0].body, Some(serde_json::json!({"approval_notes": "All good"})));
        assert_eq!(sent[1].url, "https://api.test/api/admin/sellers/registrations/7/reject/");
        assert_eq!(sent[2].url, "https://api.test/api/admin/sellers/registrations/7/request-info/");
    }

    #[tokio::test]
    async fn test_reject_requires_reason_locally() {
        let transport = Arc::new(ScriptedTransport::new());
        let api = admin(transport.clone());

        let err = api.reject_registration(7, "  ").await.unwrap_err();
        assert!(matches!(err, OpasError::Validation(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_list_notifications_wrapper() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            200,
            r#"{"results": [{"id": 1, "title": "New registration", "registration_id": 3,
                "status": "pending", "created_at": "2024-06-01T00:00:00Z"}]}"#,
        );
        let api = admin(transport);

        let list = api.list_notifications().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].registration_id, Some(3));
    }
}

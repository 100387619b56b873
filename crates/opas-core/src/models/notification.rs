use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

use super::decode::{parse_timestamp, DecodeMode};
use super::RegistrationStatus;

/// An admin notification kept in the local history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub registration_id: Option<i64>,
    pub title: String,
    pub body: String,
    pub status: Option<RegistrationStatus>,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationDto {
    pub id: Option<i64>,
    #[serde(alias = "registrationId", alias = "seller_registration")]
    pub registration_id: Option<i64>,
    pub title: Option<String>,
    #[serde(alias = "message")]
    pub body: Option<String>,
    pub status: Option<String>,
    #[serde(alias = "created_at", alias = "createdAt")]
    pub received_at: Option<String>,
    #[serde(default, alias = "is_read")]
    pub read: bool,
}

impl NotificationDto {
    pub fn into_notification(self, mode: DecodeMode) -> Result<Notification, ParseError> {
        let id = self.id.ok_or(ParseError::MissingField("id"))?;
        let title = mode.require("title", self.title, String::new)?;

        let status = match self.status {
            Some(raw) => {
                let parsed = raw.parse().ok().map(Some);
                mode.recover("status", &raw, parsed, || None)?
            }
            None => None,
        };

        let received_at = match self.received_at {
            Some(raw) => {
                let parsed = parse_timestamp(&raw);
                mode.recover("received_at", &raw, parsed, Utc::now)?
            }
            None => mode.require("received_at", None, Utc::now)?,
        };

        Ok(Notification {
            id,
            registration_id: self.registration_id,
            title,
            body: self.body.unwrap_or_default(),
            status,
            received_at,
            read: self.read,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_notification() {
        let dto: NotificationDto = serde_json::from_str(
            r#"{"id": 5, "registration_id": 12, "title": "Registration approved",
                "message": "Cruz Farms is now live", "status": "APPROVED",
                "created_at": "2024-05-02T09:00:00Z", "is_read": true}"#,
        )
        .unwrap();
        let n = dto.into_notification(DecodeMode::Strict).unwrap();
        assert_eq!(n.registration_id, Some(12));
        assert_eq!(n.status, Some(RegistrationStatus::Approved));
        assert_eq!(n.body, "Cruz Farms is now live");
        assert!(n.read);
    }

    #[test]
    fn test_decode_notification_strict_requires_timestamp() {
        let dto: NotificationDto = serde_json::from_str(r#"{"id": 5, "title": "t"}"#).unwrap();
        assert_eq!(
            dto.clone().into_notification(DecodeMode::Strict),
            Err(ParseError::MissingField("received_at"))
        );
        assert!(dto.into_notification(DecodeMode::Lenient).is_ok());
    }
}

//! Seller registration records reviewed by marketplace admins.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ParseError;

use super::decode::{optional_timestamp, parse_timestamp, DecodeMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Rejected,
    RequestMoreInfo,
}

impl RegistrationStatus {
    pub const ALL: [RegistrationStatus; 4] = [
        RegistrationStatus::Pending,
        RegistrationStatus::Approved,
        RegistrationStatus::Rejected,
        RegistrationStatus::RequestMoreInfo,
    ];

    /// Wire value used in query strings and cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Approved => "approved",
            RegistrationStatus::Rejected => "rejected",
            RegistrationStatus::RequestMoreInfo => "request_more_info",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, RegistrationStatus::Approved | RegistrationStatus::Rejected)
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Pending => write!(f, "Pending"),
            RegistrationStatus::Approved => write!(f, "Approved"),
            RegistrationStatus::Rejected => write!(f, "Rejected"),
            RegistrationStatus::RequestMoreInfo => write!(f, "More Info Requested"),
        }
    }
}

impl FromStr for RegistrationStatus {
    type Err = ParseError;

    /// Accepts the backend's spellings case-insensitively
    /// (`PENDING`, `request_more_info`, `REQUEST_MORE_INFO`, `more-info`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "pending" => Ok(RegistrationStatus::Pending),
            "approved" => Ok(RegistrationStatus::Approved),
            "rejected" => Ok(RegistrationStatus::Rejected),
            "request_more_info" | "more_info" | "more_info_requested" | "info_requested" => {
                Ok(RegistrationStatus::RequestMoreInfo)
            }
            _ => Err(ParseError::InvalidValue {
                field: "status",
                value: s.to_string(),
            }),
        }
    }
}

/// A seller registration as the client holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: i64,
    pub seller_name: String,
    pub farm_name: Option<String>,
    pub status: RegistrationStatus,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub approval_notes: Option<String>,
    pub info_request: Option<String>,
}

impl Registration {
    pub fn display_name(&self) -> String {
        match &self.farm_name {
            Some(farm) if !farm.is_empty() => format!("{} ({})", self.seller_name, farm),
            _ => self.seller_name.clone(),
        }
    }

    /// The reviewer's remark matching the current status, if any.
    pub fn review_note(&self) -> Option<&str> {
        match self.status {
            RegistrationStatus::Approved => self.approval_notes.as_deref(),
            RegistrationStatus::Rejected => self.rejection_reason.as_deref(),
            RegistrationStatus::RequestMoreInfo => self.info_request.as_deref(),
            RegistrationStatus::Pending => None,
        }
    }
}

/// Registration exactly as the backend sends it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationDto {
    pub id: Option<i64>,
    #[serde(alias = "sellerName", alias = "seller_full_name")]
    pub seller_name: Option<String>,
    #[serde(alias = "farmName", alias = "store_name")]
    pub farm_name: Option<String>,
    pub status: Option<String>,
    #[serde(alias = "submittedAt", alias = "created_at")]
    pub submitted_at: Option<String>,
    #[serde(alias = "reviewedAt")]
    pub reviewed_at: Option<String>,
    #[serde(alias = "rejectionReason")]
    pub rejection_reason: Option<String>,
    #[serde(alias = "approvalNotes")]
    pub approval_notes: Option<String>,
    #[serde(alias = "infoRequest", alias = "more_info_message")]
    pub info_request: Option<String>,
}

impl RegistrationDto {
    /// The single boundary where wire data becomes a `Registration`.
    pub fn into_registration(self, mode: DecodeMode) -> Result<Registration, ParseError> {
        // An id is never defaulted: a record without one cannot be addressed.
        let id = self.id.ok_or(ParseError::MissingField("id"))?;

        let seller_name = mode.require("seller_name", self.seller_name, String::new)?;

        let status = match self.status {
            Some(raw) => {
                let parsed = raw.parse().ok();
                mode.recover("status", &raw, parsed, || RegistrationStatus::Pending)?
            }
            None => mode.require("status", None, || RegistrationStatus::Pending)?,
        };

        let submitted_at = match self.submitted_at {
            Some(raw) => {
                let parsed = parse_timestamp(&raw);
                mode.recover("submitted_at", &raw, parsed, DateTime::<Utc>::default)?
            }
            None => mode.require("submitted_at", None, DateTime::<Utc>::default)?,
        };

        let reviewed_at = optional_timestamp(mode, "reviewed_at", self.reviewed_at)?;

        Ok(Registration {
            id,
            seller_name,
            farm_name: self.farm_name.filter(|s| !s.is_empty()),
            status,
            submitted_at,
            reviewed_at,
            rejection_reason: self.rejection_reason.filter(|s| !s.is_empty()),
            approval_notes: self.approval_notes.filter(|s| !s.is_empty()),
            info_request: self.info_request.filter(|s| !s.is_empty()),
        })
    }
}

/// One page of a registration listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationPage {
    pub items: Vec<Registration>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl RegistrationPage {
    pub fn total_pages(&self) -> u32 {
        if self.page_size == 0 || self.total == 0 {
            return 1;
        }
        u32::try_from(self.total.div_ceil(u64::from(self.page_size))).unwrap_or(u32::MAX)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}

impl RegistrationPage {
    /// Decode a listing response.
    ///
    /// The backend returns either a bare array or a paginated wrapper
    /// (`{"count": .., "results": [..]}`). In lenient mode records that
    /// cannot be decoded at all are skipped.
    pub fn decode(text: &str, page: u32, mode: DecodeMode) -> Result<Self, ParseError> {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(alias = "total")]
            count: Option<u64>,
            #[serde(default, alias = "data", alias = "registrations")]
            results: Vec<RegistrationDto>,
            page_size: Option<u32>,
        }

        let (dtos, count, page_size) =
            if let Ok(list) = serde_json::from_str::<Vec<RegistrationDto>>(text) {
                (list, None, None)
            } else {
                let wrapper: Wrapper = serde_json::from_str(text)?;
                (wrapper.results, wrapper.count, wrapper.page_size)
            };

        let mut items = Vec::with_capacity(dtos.len());
        for dto in dtos {
            match (dto.into_registration(mode), mode) {
                (Ok(r), _) => items.push(r),
                (Err(e), DecodeMode::Strict) => return Err(e),
                (Err(e), DecodeMode::Lenient) => {
                    warn!(error = %e, "Skipping undecodable registration");
                }
            }
        }

        let page_size = page_size.unwrap_or_else(|| u32::try_from(items.len()).unwrap_or(u32::MAX));
        Ok(Self {
            total: count.unwrap_or_else(|| u64::try_from(items.len()).unwrap_or(u64::MAX)),
            items,
            page,
            page_size,
        })
    }
}

//! Data models for OPAS admin entities.
//!
//! - `Registration`, `RegistrationPage`: seller registrations under review
//! - `RegistrationFilter`: list filter/pagination state and its persistence
//! - `Notification`: entries in the local notification history
//! - `DecodeMode`: strict or lenient conversion from wire payloads

pub mod decode;
pub mod filter;
pub mod notification;
pub mod registration;

pub use decode::DecodeMode;
pub use filter::{FilterRepository, RegistrationFilter, SortOrder};
pub use notification::{Notification, NotificationDto};
pub use registration::{Registration, RegistrationDto, RegistrationPage, RegistrationStatus};

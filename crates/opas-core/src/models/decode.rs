//! Decoding policy for backend payloads.
//!
//! Wire structs (`*Dto`) accept anything the backend might send. Converting
//! them into domain types is the one place where missing or malformed
//! values are either rejected (`Strict`) or replaced with defaults
//! (`Lenient`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// Any missing or malformed required field is a `ParseError`.
    Strict,
    /// Substitute defaults and log each substitution.
    Lenient,
}

impl Default for DecodeMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            DecodeMode::Strict
        } else {
            DecodeMode::Lenient
        }
    }
}

impl DecodeMode {
    /// Resolve a required field, falling back to `default` in lenient mode.
    pub(crate) fn require<T>(
        self,
        field: &'static str,
        value: Option<T>,
        default: impl FnOnce() -> T,
    ) -> Result<T, ParseError> {
        match (value, self) {
            (Some(v), _) => Ok(v),
            (None, DecodeMode::Strict) => Err(ParseError::MissingField(field)),
            (None, DecodeMode::Lenient) => {
                warn!(field, "Missing field, substituting default");
                Ok(default())
            }
        }
    }

    /// Resolve a parse failure, falling back to `default` in lenient mode.
    pub(crate) fn recover<T>(
        self,
        field: &'static str,
        raw: &str,
        parsed: Option<T>,
        default: impl FnOnce() -> T,
    ) -> Result<T, ParseError> {
        match (parsed, self) {
            (Some(v), _) => Ok(v),
            (None, DecodeMode::Strict) => Err(ParseError::InvalidValue {
                field,
                value: raw.to_string(),
            }),
            (None, DecodeMode::Lenient) => {
                warn!(field, value = raw, "Invalid field value, substituting default");
                Ok(default())
            }
        }
    }
}

/// Parse an RFC 3339 timestamp, or a bare `YYYY-MM-DD` date at midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Decode an optional timestamp: absent stays `None`, malformed is an error
/// in strict mode and `None` in lenient mode.
pub(crate) fn optional_timestamp(
    mode: DecodeMode,
    field: &'static str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, ParseError> {
    match raw {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => {
            let parsed = parse_timestamp(&s).map(Some);
            mode.recover(field, &s, parsed, || None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_timestamp_formats() {
        let dt = parse_timestamp("2024-03-05T10:30:00+02:00").unwrap();
        assert_eq!(dt.hour(), 8);

        let date = parse_timestamp("2024-03-05").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2024, 3, 5));

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_require_strict_and_lenient() {
        assert_eq!(
            DecodeMode::Strict.require("id", None::<i64>, || 0),
            Err(ParseError::MissingField("id"))
        );
        assert_eq!(DecodeMode::Lenient.require("id", None::<i64>, || 7), Ok(7));
        assert_eq!(DecodeMode::Strict.require("id", Some(3), || 0), Ok(3));
    }

    #[test]
    fn test_optional_timestamp() {
        assert_eq!(optional_timestamp(DecodeMode::Strict, "reviewed_at", None), Ok(None));
        assert_eq!(
            optional_timestamp(DecodeMode::Strict, "reviewed_at", Some(String::new())),
            Ok(None)
        );
        assert!(optional_timestamp(DecodeMode::Strict, "reviewed_at", Some("nope".into())).is_err());
        assert_eq!(
            optional_timestamp(DecodeMode::Lenient, "reviewed_at", Some("nope".into())),
            Ok(None)
        );
    }
}

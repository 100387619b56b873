//! Error types shared by every service in the crate.
//!
//! `OpasError` is a closed set of failure kinds so callers can branch on the
//! cause instead of matching on message text. It is `Clone` because a single
//! in-flight fetch may resolve many waiters with the same failure.

use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpasError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized, please log in again: {0}")]
    Auth(String),

    #[error("{0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid response: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failure to turn a backend payload into a domain value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("malformed JSON: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(e: serde_json::Error) -> Self {
        ParseError::Malformed(e.to_string())
    }
}

/// Failure in the local key-value store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("I/O failure for `{key}`: {message}")]
    Io { key: String, message: String },

    #[error("could not serialize `{key}`: {message}")]
    Serialization { key: String, message: String },

    #[error("keychain: {0}")]
    Keychain(String),
}

impl StorageError {
    pub fn io(key: &str, err: &std::io::Error) -> Self {
        StorageError::Io {
            key: key.to_string(),
            message: err.to_string(),
        }
    }

    pub fn serialization(key: &str, err: &serde_json::Error) -> Self {
        StorageError::Serialization {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for OpasError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OpasError::Network(format!("request timed out: {}", e))
        } else {
            OpasError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for OpasError {
    fn from(e: serde_json::Error) -> Self {
        OpasError::Parse(e.into())
    }
}

pub type Result<T> = std::result::Result<T, OpasError>;

impl OpasError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Map a non-success HTTP status and its body to an error kind.
    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            400 | 422 => OpasError::Validation(Self::backend_message(body).unwrap_or(truncated)),
            401 => OpasError::Auth("token rejected".to_string()),
            403 => OpasError::Auth(format!("access denied: {}", truncated)),
            404 => OpasError::NotFound(truncated),
            429 => OpasError::RateLimited,
            500..=599 => OpasError::Server(truncated),
            _ => OpasError::Server(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Extract the human-readable message from a backend error payload.
    ///
    /// Recognises `{"detail": ..}`, `{"error": ..}`, `{"message": ..}` and
    /// field error maps like `{"reason": ["This field is required."]}`.
    fn backend_message(body: &str) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        let object = value.as_object()?;

        for field in ["detail", "error", "message"] {
            if let Some(text) = object.get(field).and_then(|v| v.as_str()) {
                return Some(text.to_string());
            }
        }

        let mut parts = Vec::new();
        for (field, errors) in object {
            match errors {
                serde_json::Value::String(s) => parts.push(format!("{}: {}", field, s)),
                serde_json::Value::Array(items) => {
                    let joined: Vec<&str> = items.iter().filter_map(|i| i.as_str()).collect();
                    if !joined.is_empty() {
                        parts.push(format!("{}: {}", field, joined.join(" ")));
                    }
                }
                _ => {}
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, OpasError::Auth(_))
    }

    /// Errors worth retrying later without user action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OpasError::Network(_) | OpasError::RateLimited | OpasError::Server(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_validation_uses_detail() {
        let err = OpasError::from_status(400, r#"{"detail": "Reason is required"}"#);
        assert_eq!(err, OpasError::Validation("Reason is required".to_string()));
        assert_eq!(err.to_string(), "Reason is required");
    }

    #[test]
    fn test_from_status_validation_field_errors() {
        let err = OpasError::from_status(400, r#"{"reason": ["This field is required."]}"#);
        assert_eq!(
            err,
            OpasError::Validation("reason: This field is required.".to_string())
        );
    }

    #[test]
    fn test_from_status_validation_raw_body() {
        let err = OpasError::from_status(400, "bad things");
        assert_eq!(err, OpasError::Validation("bad things".to_string()));
    }

    #[test]
    fn test_from_status_kinds() {
        assert!(OpasError::from_status(401, "").is_auth());
        assert!(OpasError::from_status(403, "nope").is_auth());
        assert!(matches!(OpasError::from_status(404, "x"), OpasError::NotFound(_)));
        assert_eq!(OpasError::from_status(429, ""), OpasError::RateLimited);
        assert!(OpasError::from_status(503, "down").is_transient());
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(600);
        let truncated = OpasError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 600 total bytes)"));
        assert_eq!(OpasError::truncate_body("short"), "short");
    }
}

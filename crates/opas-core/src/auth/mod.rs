//! Authentication state and credentials.
//!
//! - `SessionStore`: the bearer/refresh token pair, persisted in the
//!   key-value store and rotated by the API client on refresh
//! - `CredentialStore`: optional OS keychain storage of the admin password

pub mod credentials;
pub mod session;

pub use credentials::CredentialStore;
pub use session::{SessionData, SessionStore};

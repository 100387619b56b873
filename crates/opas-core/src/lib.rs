//! OPAS admin client core.
//!
//! Seller registration review for the OPAS marketplace backend. Reads go
//! through a TTL cache over a pluggable key-value store and are served
//! stale-while-revalidate by `controller::RegistrationController`, so front
//! ends keep working offline from the last fetched data.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod models;
pub mod notifications;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use context::AdminContext;
pub use error::{OpasError, ParseError, Result, StorageError};

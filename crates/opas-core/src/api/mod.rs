//! REST API client module for the OPAS backend.
//!
//! `ApiClient` handles bearer authentication, the one-shot token refresh
//! and rate-limit backoff on top of a pluggable `Transport`. `AdminApi`
//! exposes the admin endpoints the rest of the crate consumes.

pub mod admin;
pub mod client;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use admin::AdminApi;
pub use client::ApiClient;
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};

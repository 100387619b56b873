//! API client for communicating with the OPAS backend.
//!
//! `ApiClient` owns the base URL, the transport and the session. Every
//! authenticated request carries the current bearer token; a 401 triggers
//! one token refresh and one retry of the original request. Concurrent 401s
//! share a single refresh.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{SessionData, SessionStore};
use crate::error::{OpasError, Result};

use super::transport::{HttpRequest, HttpResponse, Transport};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login/";

const REFRESH_PATH: &str = "/auth/token/refresh/";

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token", alias = "token")]
    access: String,
    #[serde(default, alias = "refresh_token")]
    refresh: Option<String>,
}

/// Clone is cheap: transport and session are shared.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base_url: Arc<str>,
    session: SessionStore,
    // Held for the duration of a token refresh
    refresh_lock: Arc<Mutex<()>>,
}

impl ApiClient {
    pub fn with_transport(base_url: &str, transport: Arc<dyn Transport>, session: SessionStore) -> Self {
        Self {
            transport,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            session,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ===== Authentication =====

    /// Log in with admin credentials and store the resulting session.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionData> {
        let request = HttpRequest::post(
            self.url(LOGIN_PATH),
            serde_json::json!({ "username": username, "password": password }),
        );
        let response = self.transport.send(request).await?;

        if !response.is_success() {
            return Err(match response.status {
                400 | 401 => match OpasError::from_status(400, &response.body) {
                    OpasError::Validation(msg) if !msg.is_empty() => OpasError::Auth(msg),
                    _ => OpasError::Auth("invalid credentials".to_string()),
                },
                status => OpasError::from_status(status, &response.body),
            });
        }

        let tokens: TokenResponse = serde_json::from_str(&response.body)?;
        let data = SessionData {
            access_token: tokens.access,
            refresh_token: tokens.refresh,
            username: username.to_string(),
            issued_at: Utc::now(),
        };
        self.session.update(data.clone());
        info!(username, "Logged in");
        Ok(data)
    }

    pub fn logout(&self) {
        self.session.clear();
        info!("Logged out");
    }

    /// Exchange the refresh token for a new access token after `rejected`
    /// was refused. Any rejection clears the session.
    ///
    /// If another request already replaced `rejected` while this one waited
    /// for the lock, its token is reused and no refresh is sent.
    async fn refresh_access_token(&self, rejected: &str) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        match self.session.access_token() {
            Some(current) if current != rejected => {
                debug!("Access token already refreshed");
                return Ok(());
            }
            Some(_) => {}
            None => return Err(OpasError::Auth("session expired".to_string())),
        }

        let Some(refresh) = self.session.refresh_token() else {
            self.session.clear();
            return Err(OpasError::Auth("no refresh token available".to_string()));
        };

        let request = HttpRequest::post(
            self.url(REFRESH_PATH),
            serde_json::json!({ "refresh": refresh }),
        );
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            warn!(status = response.status, "Token refresh rejected");
            self.session.clear();
            return Err(OpasError::Auth("token refresh failed".to_string()));
        }

        let tokens: TokenResponse = serde_json::from_str(&response.body)?;
        self.session.rotate(tokens.access, tokens.refresh);
        debug!("Access token refreshed");
        Ok(())
    }

    // ===== Authorized requests =====

    /// Send `request` with the session's bearer token.
    ///
    /// A 401 refreshes the token and retries exactly once; a second 401
    /// clears the session and returns `OpasError::Auth`. A 429 backs off
    /// exponentially.
    pub(crate) async fn send_authorized(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut refreshed = false;
        let mut rate_retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let token = self
                .session
                .access_token()
                .ok_or_else(|| OpasError::Auth("not logged in".to_string()))?;

            let response = self
                .transport
                .send(request.clone().with_bearer(token.clone()))
                .await?;

            match response.status {
                200..=299 => return Ok(response),
                401 if !refreshed => {
                    debug!(url = %request.url, "Access token rejected, refreshing");
                    refreshed = true;
                    self.refresh_access_token(&token).await?;
                }
                401 => {
                    warn!(url = %request.url, "Access token rejected after refresh");
                    self.session.clear();
                    return Err(OpasError::Auth("session expired".to_string()));
                }
                429 => {
                    rate_retries += 1;
                    if rate_retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(OpasError::RateLimited);
                    }
                    warn!(url = %request.url, retry = rate_retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                status => {
                    debug!(url = %request.url, status, "Request failed");
                    return Err(OpasError::from_status(status, &response.body));
                }
            }
        }
    }

    pub(crate) async fn get_text(&self, path: &str, query: Vec<(String, String)>) -> Result<String> {
        let request = HttpRequest::get(self.url(path)).with_query(query);
        Ok(self.send_authorized(request).await?.body)
    }

    pub(crate) async fn post_text(&self, path: &str, body: serde_json::Value) -> Result<String> {
        let request = HttpRequest::post(self.url(path), body);
        Ok(self.send_authorized(request).await?.body)
    }
}

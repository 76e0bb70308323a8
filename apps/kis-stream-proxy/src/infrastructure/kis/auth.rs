//! KIS OAuth Adapter
//!
//! Issues the WebSocket approval key (`/oauth2/Approval`) and the REST
//! bearer token (`/oauth2/tokenP`). The token is cached until shortly
//! before it expires.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::application::ports::{AccessTokenProvider, ApprovalKeyProvider};
use crate::domain::auth::{AccessToken, Credential};
use crate::infrastructure::config::AppCredentials;

const APPROVAL_PATH: &str = "/oauth2/Approval";
const TOKEN_PATH: &str = "/oauth2/tokenP";
const GRANT_TYPE: &str = "client_credentials";

/// Refresh the token this long before it expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Lifetime assumed when the response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 86_400;

/// Errors creating the auth client.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct ApprovalRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    secretkey: &'a str,
}

#[derive(Deserialize)]
struct ApprovalResponse {
    #[serde(alias = "approvalKey")]
    approval_key: Option<String>,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    appsecret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// Client for the KIS OAuth endpoints.
pub struct KisAuthClient {
    client: Client,
    base_url: String,
    credentials: AppCredentials,
    token: Mutex<Option<AccessToken>>,
}

impl KisAuthClient {
    /// Create a client against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        credentials: AppCredentials,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            token: Mutex::new(None),
        })
    }

    /// App credentials, for adapters that sign requests with them.
    #[must_use]
    pub const fn credentials(&self) -> &AppCredentials {
        &self.credentials
    }

    async fn request_approval_key(&self) -> Result<Option<String>, reqwest::Error> {
        let body = ApprovalRequest {
            grant_type: GRANT_TYPE,
            appkey: self.credentials.app_key(),
            secretkey: self.credentials.app_secret(),
        };

        let response = self
            .client
            .post(format!("{}{APPROVAL_PATH}", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "Approval key request rejected");
            return Ok(None);
        }

        let parsed: ApprovalResponse = response.json().await?;
        Ok(parsed.approval_key.filter(|k| !k.is_empty()))
    }

    async fn request_access_token(&self) -> Result<Option<AccessToken>, reqwest::Error> {
        let body = TokenRequest {
            grant_type: GRANT_TYPE,
            appkey: self.credentials.app_key(),
            appsecret: self.credentials.app_secret(),
        };

        let response = self
            .client
            .post(format!("{}{TOKEN_PATH}", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "Access token request rejected");
            return Ok(None);
        }

        let parsed: TokenResponse = response.json().await?;
        let Some(token) = parsed.access_token.filter(|t| !t.is_empty()) else {
            tracing::warn!("Access token response had no token");
            return Ok(None);
        };

        let now = Utc::now();
        let expires_at = parsed
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or_else(|| {
                if let Some(secs) = parsed.expires_in {
                    tracing::warn!(
                        expires_in = secs,
                        "Token lifetime out of range, using default"
                    );
                }
                now + chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS)
            });
        Ok(Some(AccessToken::new(token, expires_at)))
    }
}

#[async_trait]
impl ApprovalKeyProvider for KisAuthClient {
    async fn approval_key(&self) -> Option<Credential> {
        match self.request_approval_key().await {
            Ok(Some(key)) => Some(Credential::new(key, Utc::now())),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Approval key request failed");
                None
            }
        }
    }
}

#[async_trait]
impl AccessTokenProvider for KisAuthClient {
    async fn access_token(&self) -> Option<AccessToken> {
        let mut cached = self.token.lock().await;

        let margin = chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now(), margin)) {
            return Some(token.clone());
        }

        match self.request_access_token().await {
            Ok(Some(token)) => {
                tracing::info!(expires_at = %token.expires_at(), "Access token issued");
                *cached = Some(token.clone());
                Some(token)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Access token request failed");
                None
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

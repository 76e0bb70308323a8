//! Credentials
//!
//! Secrets issued by the KIS REST API. Debug output never shows them.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

/// Approval key for the real-time WebSocket feed.
///
/// Issued once and cached for the life of the process.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    key: String,
    acquired_at: DateTime<Utc>,
}

impl Credential {
    /// Wrap a freshly issued approval key.
    #[must_use]
    pub fn new(key: impl Into<String>, acquired_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            acquired_at,
        }
    }

    /// The approval key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// When the key was issued.
    #[must_use]
    pub const fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &"[REDACTED]")
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

/// Bearer token for REST calls.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Wrap a token that expires at `expires_at`.
    #[must_use]
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// The bearer token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Expiry instant.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token is still usable for at least `margin` after `now`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

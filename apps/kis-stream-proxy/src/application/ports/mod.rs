//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ApprovalKeyProvider`: issues the WebSocket approval key
//! - `AccessTokenProvider`: issues the REST bearer token
//! - `RankingSource`: fetches the fluctuation ranking
//! - `ChangeDetector`: consumes each ranking snapshot

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::auth::{AccessToken, Credential};
use crate::domain::ranking::RankEntry;

/// Issues the approval key for the real-time feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApprovalKeyProvider: Send + Sync {
    /// Request a fresh approval key.
    ///
    /// Every failure collapses to `None`; the caller retries on its own
    /// schedule.
    async fn approval_key(&self) -> Option<Credential>;
}

/// Issues bearer tokens for REST calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Current token, refreshed if it is close to expiry.
    async fn access_token(&self) -> Option<AccessToken>;
}

/// Errors from a ranking fetch.
#[derive(Debug, Error)]
pub enum RankingError {
    /// Transport or HTTP status failure.
    #[error("ranking request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("ranking response malformed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Source of ranking snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RankingSource: Send + Sync {
    /// Fetch the fluctuation (percent change) ranking.
    ///
    /// `Ok(None)` means the API answered but returned nothing usable
    /// (an error code, or no token).
    ///
    /// # Errors
    ///
    /// Returns error if the request or its decoding fails.
    async fn fluctuation_rank(&self) -> Result<Option<Vec<RankEntry>>, RankingError>;
}

/// Consumer of ranking snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Compare a snapshot with the previous one and act on what changed.
    ///
    /// Returns the number of changes handled.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    async fn detect_and_process_changes(&self, entries: &[RankEntry]) -> anyhow::Result<usize>;
}

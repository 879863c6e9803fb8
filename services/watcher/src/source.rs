//! Roster source interface.
//!
//! A roster source answers one question: which corporations are in the
//! alliance right now. Each call is an independent, side-effect free
//! snapshot request, so the poll loop may repeat it freely.

use std::time::Duration;

use async_trait::async_trait;
use corpwatch_reconcile::Roster;
use thiserror::Error;

/// Errors from fetching a roster.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, DNS or other transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within the timeout.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream asked us to slow down (ESI error limit or HTTP 429).
    #[error("rate limited by upstream (status {status})")]
    RateLimited { status: u16 },

    /// Upstream failed on its side (5xx and other unexpected statuses).
    #[error("upstream error: status {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The response body was not a list of corporation ids.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Upstream rejected our credentials.
    #[error("authentication failed (status {status}): {body}")]
    Unauthorized { status: u16, body: String },

    /// Upstream does not know the alliance.
    #[error("invalid alliance (status {status}): {body}")]
    InvalidAlliance { status: u16, body: String },

    /// Upstream does not know a looked-up entity.
    #[error("not found (status {status}): {body}")]
    NotFound { status: u16, body: String },
}

impl FetchError {
    /// Returns true if repeating the fetch may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Unauthorized { .. } | Self::InvalidAlliance { .. } | Self::NotFound { .. }
        )
    }
}

/// Source of the alliance's current corporation roster.
#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Fetch the roster as of now.
    async fn fetch(&self) -> Result<Roster, FetchError>;
}

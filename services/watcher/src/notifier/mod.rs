//! Notification sinks for membership events.
//!
//! The poll loop hands every event to a [`Notifier`] exactly once, in diff
//! order. Sinks own their rendering and any rate limiting toward the chat
//! platform; from the loop's point of view every failure is retryable.
//!
//! - `discord`: posts an embed to a Discord channel
//! - `log`: writes events to the log (dry-run mode)

mod discord;
mod log;

use std::time::Duration;

use async_trait::async_trait;
use corpwatch_reconcile::MembershipEvent;
use thiserror::Error;

pub use discord::{build_embed, DiscordNotifier, Embed, EmbedField};
pub use log::LogNotifier;

/// Errors from delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Connection, DNS or other transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within the timeout.
    #[error("notify timed out after {0:?}")]
    Timeout(Duration),

    /// The chat platform kept rate limiting us.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The chat platform refused the message.
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Delivers membership events to a channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one event.
    async fn notify(&self, event: &MembershipEvent) -> Result<(), NotifyError>;
}

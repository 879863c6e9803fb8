//! Log-only notifier for dry runs.

use async_trait::async_trait;
use corpwatch_id::AllianceId;
use corpwatch_reconcile::MembershipEvent;
use tracing::info;

use super::{Notifier, NotifyError};

/// Writes each event to the log instead of a chat channel.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    alliance_id: AllianceId,
}

impl LogNotifier {
    pub fn new(alliance_id: AllianceId) -> Self {
        Self { alliance_id }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &MembershipEvent) -> Result<(), NotifyError> {
        info!(
            alliance_id = %self.alliance_id,
            corporation_id = %event.corporation_id,
            kind = %event.kind,
            observed_at = %event.observed_at,
            "Membership change (dry run)"
        );
        Ok(())
    }
}

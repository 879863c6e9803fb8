//! Cached lookups of corporation and alliance details.
//!
//! Names and tickers change rarely, so successful lookups are kept for the
//! life of the process. Failed lookups are not cached.

use std::collections::HashMap;

use corpwatch_id::{AllianceId, CorporationId};
use tokio::sync::RwLock;
use tracing::debug;

use crate::esi::{AllianceInfo, CorporationInfo, EsiClient};
use crate::source::FetchError;

/// In-memory cache in front of ESI detail endpoints.
#[derive(Debug)]
pub struct InformationCache {
    esi: EsiClient,
    alliances: RwLock<HashMap<AllianceId, AllianceInfo>>,
    corporations: RwLock<HashMap<CorporationId, CorporationInfo>>,
}

impl InformationCache {
    pub fn new(esi: EsiClient) -> Self {
        Self {
            esi,
            alliances: RwLock::default(),
            corporations: RwLock::default(),
        }
    }

    pub async fn alliance(&self, id: AllianceId) -> Result<AllianceInfo, FetchError> {
        if let Some(info) = self.alliances.read().await.get(&id) {
            return Ok(info.clone());
        }

        let info = self.esi.get_alliance(id).await?;
        debug!(alliance_id = %id, name = %info.name, "Cached alliance details");
        self.alliances.write().await.insert(id, info.clone());
        Ok(info)
    }

    pub async fn corporation(&self, id: CorporationId) -> Result<CorporationInfo, FetchError> {
        if let Some(info) = self.corporations.read().await.get(&id) {
            return Ok(info.clone());
        }

        let info = self.esi.get_corporation(id).await?;
        debug!(corporation_id = %id, name = %info.name, "Cached corporation details");
        self.corporations.write().await.insert(id, info.clone());
        Ok(info)
    }
}

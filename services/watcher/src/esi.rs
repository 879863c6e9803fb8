//! ESI (EVE Swagger Interface) client.
//!
//! Provides the few public endpoints corpwatch needs:
//! - Alliance corporation roster (the roster source)
//! - Corporation and alliance details (for rendering notifications)

use std::time::Duration;

use async_trait::async_trait;
use corpwatch_id::{AllianceId, CorporationId};
use corpwatch_reconcile::Roster;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::source::{FetchError, RosterSource};

/// ESI datasource every request is pinned to.
const DATASOURCE: &str = "tranquility";

/// ESI's "error limited" status.
const ESI_ERROR_LIMITED: u16 = 420;

/// ESI API client.
#[derive(Debug, Clone)]
pub struct EsiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

/// Public corporation details.
#[derive(Debug, Clone, Deserialize)]
pub struct CorporationInfo {
    pub name: String,
    pub ticker: String,
    pub member_count: u32,
}

/// Public alliance details.
#[derive(Debug, Clone, Deserialize)]
pub struct AllianceInfo {
    pub name: String,
    pub ticker: String,
}

impl EsiClient {
    /// Create a new ESI client.
    pub fn new(
        base_url: impl Into<String>,
        user_agent: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    /// Create a client from the watcher configuration.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Self::new(
            config.esi_url.clone(),
            &config.user_agent,
            config.esi_token.clone(),
            config.call_timeout,
        )
    }

    /// Fetch the ids of all corporations in an alliance.
    pub async fn get_alliance_corporations(
        &self,
        alliance_id: AllianceId,
    ) -> Result<Vec<CorporationId>, FetchError> {
        let path = format!("alliances/{alliance_id}/corporations/");
        let raw: Vec<i64> = self.get_json(&path).await.map_err(|e| match e {
            FetchError::NotFound { status, body } => FetchError::InvalidAlliance { status, body },
            other => other,
        })?;

        let corporations = raw
            .into_iter()
            .map(|id| {
                CorporationId::try_new(id).map_err(|e| FetchError::Malformed(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            alliance_id = %alliance_id,
            corporation_count = corporations.len(),
            "Fetched alliance corporations"
        );

        Ok(corporations)
    }

    /// Fetch public corporation details.
    pub async fn get_corporation(
        &self,
        corporation_id: CorporationId,
    ) -> Result<CorporationInfo, FetchError> {
        self.get_json(&format!("corporations/{corporation_id}/"))
            .await
    }

    /// Fetch public alliance details.
    pub async fn get_alliance(&self, alliance_id: AllianceId) -> Result<AllianceInfo, FetchError> {
        self.get_json(&format!("alliances/{alliance_id}/")).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "ESI request");

        let mut request = self.client.get(&url).query(&[("datasource", DATASOURCE)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        serde_json::from_str(&body).map_err(|e| FetchError::Malformed(format!("{path}: {e}")))
    }

    fn transport_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(error.to_string())
        }
    }
}

/// Map a non-success ESI status to a fetch error.
fn classify_status(status: StatusCode, body: String) -> FetchError {
    let code = status.as_u16();
    match code {
        401 | 403 => FetchError::Unauthorized { status: code, body },
        400 | 404 | 422 => FetchError::NotFound { status: code, body },
        ESI_ERROR_LIMITED | 429 => FetchError::RateLimited { status: code },
        _ => FetchError::Upstream { status: code, body },
    }
}

/// Roster source backed by ESI for a single alliance.
#[derive(Debug, Clone)]
pub struct EsiRosterSource {
    esi: EsiClient,
    alliance_id: AllianceId,
}

impl EsiRosterSource {
    pub fn new(esi: EsiClient, alliance_id: AllianceId) -> Self {
        Self { esi, alliance_id }
    }
}

#[async_trait]
impl RosterSource for EsiRosterSource {
    async fn fetch(&self) -> Result<Roster, FetchError> {
        let corporations = self.esi.get_alliance_corporations(self.alliance_id).await?;
        Ok(Roster::from(corporations))
    }
}

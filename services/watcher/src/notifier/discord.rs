//! Discord channel notifier.
//!
//! Posts one embed per event through the Discord REST API using a bot
//! token. Corporation and alliance names are looked up through the
//! information cache; when a lookup fails the message falls back to raw ids
//! rather than holding up delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corpwatch_id::{AllianceId, ChannelId};
use corpwatch_reconcile::{EventKind, MembershipEvent};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Notifier, NotifyError};
use crate::esi::{AllianceInfo, CorporationInfo};
use crate::information::InformationCache;

/// Embed accent colour.
const EMBED_COLOR: u32 = 0xBC45FF;

/// Longest rate-limit pause honoured before giving the failure back.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(10);

const DOTLAN_URL: &str = "https://evemaps.dotlan.net";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    embeds: [&'a Embed; 1],
}

fn field(name: &str, value: String) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value,
        inline: false,
    }
}

fn dotlan_link(kind: &str, name: &str) -> String {
    format!("{}/{}/{}", DOTLAN_URL, kind, name.replace(' ', "_"))
}

/// Render the embed for one event.
pub fn build_embed(
    event: &MembershipEvent,
    alliance_id: AllianceId,
    corporation: Option<&CorporationInfo>,
    alliance: Option<&AllianceInfo>,
) -> Embed {
    let title = match event.kind {
        EventKind::Joined => "Joined Alliance",
        EventKind::Left => "Left Alliance",
    };

    let mut fields = Vec::with_capacity(3);
    match corporation {
        Some(corp) => {
            fields.push(field(
                "Corporation",
                format!(
                    "{} ([{}]({}))",
                    corp.name,
                    corp.ticker,
                    dotlan_link("corp", &corp.name)
                ),
            ));
            fields.push(field("Member Count", corp.member_count.to_string()));
        }
        None => fields.push(field(
            "Corporation",
            format!("Corporation {}", event.corporation_id),
        )),
    }

    let alliance_value = match alliance {
        Some(info) => format!(
            "{} ([{}]({}))",
            info.name,
            info.ticker,
            dotlan_link("alliance", &info.name)
        ),
        None => format!("Alliance {alliance_id}"),
    };
    fields.push(field("Alliance", alliance_value));

    Embed {
        title: title.to_string(),
        color: EMBED_COLOR,
        fields,
        timestamp: event.observed_at.to_rfc3339(),
    }
}

/// Posts membership events to a Discord channel.
pub struct DiscordNotifier {
    client: reqwest::Client,
    api_url: String,
    token: String,
    channel_id: ChannelId,
    alliance_id: AllianceId,
    information: Arc<InformationCache>,
    min_member_count: u32,
}

impl DiscordNotifier {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        channel_id: ChannelId,
        alliance_id: AllianceId,
        information: Arc<InformationCache>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            channel_id,
            alliance_id,
            information,
            min_member_count: 0,
        })
    }

    /// Skip corporations with fewer members than `count`.
    pub fn with_min_member_count(mut self, count: u32) -> Self {
        self.min_member_count = count;
        self
    }

    async fn post(&self, embed: &Embed) -> Result<(), NotifyError> {
        let url = format!("{}/channels/{}/messages", self.api_url, self.channel_id);
        let body = CreateMessage { embeds: [embed] };

        let mut rate_limited_once = false;
        loop {
            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bot {}", self.token))
                .json(&body)
                .send()
                .await
                .map_err(|e| NotifyError::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = retry_after(response.headers());
                match retry_after {
                    Some(wait) if !rate_limited_once && wait <= MAX_RATE_LIMIT_WAIT => {
                        debug!(wait_ms = wait.as_millis() as u64, "Discord rate limited, waiting");
                        rate_limited_once = true;
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    _ => return Err(NotifyError::RateLimited { retry_after }),
                }
            }

            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, event: &MembershipEvent) -> Result<(), NotifyError> {
        let (corporation, alliance) = tokio::join!(
            self.information.corporation(event.corporation_id),
            self.information.alliance(self.alliance_id)
        );

        let corporation = match corporation {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(
                    corporation_id = %event.corporation_id,
                    error = %e,
                    "Corporation lookup failed, sending ids only"
                );
                None
            }
        };
        let alliance = alliance
            .map_err(|e| warn!(alliance_id = %self.alliance_id, error = %e, "Alliance lookup failed"))
            .ok();

        if let Some(corp) = &corporation {
            if corp.member_count < self.min_member_count {
                info!(
                    corporation_id = %event.corporation_id,
                    member_count = corp.member_count,
                    min_member_count = self.min_member_count,
                    "Skipping notification for small corporation"
                );
                return Ok(());
            }
        }

        let embed = build_embed(
            event,
            self.alliance_id,
            corporation.as_ref(),
            alliance.as_ref(),
        );
        self.post(&embed).await?;

        info!(
            corporation_id = %event.corporation_id,
            kind = %event.kind,
            channel_id = %self.channel_id,
            "Notification posted"
        );
        Ok(())
    }
}

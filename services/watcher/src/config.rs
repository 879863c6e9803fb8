//! Watcher configuration.
//!
//! Everything is read from environment variables; see `Config::from_env`.

use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use corpwatch_id::{AllianceId, ChannelId};
use corpwatch_reconcile::RetryPolicy;

/// Default ESI base URL.
pub const DEFAULT_ESI_URL: &str = "https://esi.evetech.net/latest";

/// Default Discord REST API base URL.
pub const DEFAULT_DISCORD_URL: &str = "https://discord.com/api/v10";

/// Snapshot file name inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "snapshot.json";

/// Watcher configuration (env-driven).
#[derive(Clone)]
pub struct Config {
    /// Alliance whose corporations are watched.
    pub alliance_id: AllianceId,

    /// Discord channel to announce changes in. Unset only in dry-run mode.
    pub channel_id: Option<ChannelId>,

    /// Discord bot token. Unset only in dry-run mode.
    pub discord_token: Option<String>,

    /// Discord REST API base URL.
    pub discord_url: String,

    /// ESI base URL (example: https://esi.evetech.net/latest).
    pub esi_url: String,

    /// Optional bearer token sent to ESI.
    pub esi_token: Option<String>,

    /// User-Agent header sent to ESI.
    pub user_agent: String,

    /// Directory holding the roster snapshot.
    pub data_dir: PathBuf,

    /// Interval between poll cycles.
    pub poll_interval: Duration,

    /// Timeout applied to every fetch, persist and notify call.
    pub call_timeout: Duration,

    /// Backoff shared by fetch, persist and notify call sites.
    pub retry: RetryPolicy,

    /// Max notifications in flight within one cycle.
    pub notify_concurrency: usize,

    /// Corporations with fewer members are not announced (0 disables).
    pub min_member_count: u32,

    /// Log events instead of posting them to Discord.
    pub dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let alliance_id: AllianceId = lookup("CORPWATCH_ALLIANCE_ID")
            .context("Missing alliance id. Set CORPWATCH_ALLIANCE_ID.")?
            .parse()
            .context("CORPWATCH_ALLIANCE_ID must be a positive integer.")?;

        let dry_run = lookup("CORPWATCH_DRY_RUN")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let channel_id: Option<ChannelId> = parse_var(&lookup, "CORPWATCH_CHANNEL_ID")
            .context("CORPWATCH_CHANNEL_ID must be a Discord channel id.")?;
        let discord_token = lookup("DISCORD_TOKEN").filter(|v| !v.trim().is_empty());

        if !dry_run {
            if channel_id.is_none() {
                bail!("Missing channel id. Set CORPWATCH_CHANNEL_ID (or CORPWATCH_DRY_RUN=1).");
            }
            if discord_token.is_none() {
                bail!("Missing Discord token. Set DISCORD_TOKEN (or CORPWATCH_DRY_RUN=1).");
            }
        }

        let discord_url = lookup("CORPWATCH_DISCORD_URL")
            .unwrap_or_else(|| DEFAULT_DISCORD_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let esi_url = lookup("CORPWATCH_ESI_URL")
            .unwrap_or_else(|| DEFAULT_ESI_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let esi_token = lookup("CORPWATCH_ESI_TOKEN").filter(|v| !v.trim().is_empty());

        let user_agent = lookup("CORPWATCH_USER_AGENT")
            .unwrap_or_else(|| format!("corpwatch/{}", env!("CARGO_PKG_VERSION")));

        let data_dir = lookup("CORPWATCH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/corpwatch"));

        let poll_interval_secs: u64 = parse_var(&lookup, "CORPWATCH_POLL_INTERVAL_SECS")
            .context("CORPWATCH_POLL_INTERVAL_SECS must be an integer (seconds).")?
            .unwrap_or(300);
        // ESI caches the alliance corporations endpoint for an hour.
        let poll_interval = Duration::from_secs(poll_interval_secs.max(10));

        let call_timeout_secs: u64 = parse_var(&lookup, "CORPWATCH_CALL_TIMEOUT_SECS")
            .context("CORPWATCH_CALL_TIMEOUT_SECS must be an integer (seconds).")?
            .unwrap_or(30);
        let call_timeout = Duration::from_secs(call_timeout_secs.clamp(1, 300));

        let defaults = RetryPolicy::default();
        let max_attempts: u32 = parse_var(&lookup, "CORPWATCH_RETRY_MAX_ATTEMPTS")
            .context("CORPWATCH_RETRY_MAX_ATTEMPTS must be an integer.")?
            .unwrap_or(defaults.max_attempts)
            .clamp(1, 20);
        let base_delay_ms: u64 = parse_var(&lookup, "CORPWATCH_RETRY_BASE_MS")
            .context("CORPWATCH_RETRY_BASE_MS must be an integer (milliseconds).")?
            .unwrap_or(defaults.base_delay.as_millis() as u64);
        let max_delay_ms: u64 = parse_var(&lookup, "CORPWATCH_RETRY_MAX_MS")
            .context("CORPWATCH_RETRY_MAX_MS must be an integer (milliseconds).")?
            .unwrap_or(defaults.max_delay.as_millis() as u64);
        let retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms.max(base_delay_ms)),
            ..defaults
        };

        let notify_concurrency: usize = parse_var(&lookup, "CORPWATCH_NOTIFY_CONCURRENCY")
            .context("CORPWATCH_NOTIFY_CONCURRENCY must be an integer.")?
            .unwrap_or(1)
            .clamp(1, 8);

        let min_member_count: u32 = parse_var(&lookup, "CORPWATCH_MIN_MEMBER_COUNT")
            .context("CORPWATCH_MIN_MEMBER_COUNT must be an integer.")?
            .unwrap_or(0);

        let log_level = lookup("CORPWATCH_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            alliance_id,
            channel_id,
            discord_token,
            discord_url,
            esi_url,
            esi_token,
            user_agent,
            data_dir,
            poll_interval,
            call_timeout,
            retry,
            notify_concurrency,
            min_member_count,
            dry_run,
            log_level,
        })
    }

    /// Path of the persisted roster snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE_NAME)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("alliance_id", &self.alliance_id)
            .field("channel_id", &self.channel_id)
            .field("discord_token", &self.discord_token.as_ref().map(|_| "<redacted>"))
            .field("discord_url", &self.discord_url)
            .field("esi_url", &self.esi_url)
            .field("esi_token", &self.esi_token.as_ref().map(|_| "<redacted>"))
            .field("user_agent", &self.user_agent)
            .field("data_dir", &self.data_dir)
            .field("poll_interval", &self.poll_interval)
            .field("call_timeout", &self.call_timeout)
            .field("retry", &self.retry)
            .field("notify_concurrency", &self.notify_concurrency)
            .field("min_member_count", &self.min_member_count)
            .field("dry_run", &self.dry_run)
            .field("log_level", &self.log_level)
            .finish()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("Invalid value for {key}"))
}

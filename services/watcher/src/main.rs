//! corpwatch
//!
//! Polls ESI for the corporations of one alliance and posts a Discord
//! message whenever a corporation joins or leaves.
//!
//! Exits with a non-zero status if startup fails (bad configuration, a
//! corrupt or incompatible snapshot) or if the watcher hits a fatal error.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use corpwatch::config::Config;
use corpwatch::esi::{EsiClient, EsiRosterSource};
use corpwatch::information::InformationCache;
use corpwatch::{
    DiscordNotifier, FileSnapshotStore, LogNotifier, Notifier, RosterSource, SnapshotStore,
    Watcher, WatcherConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to CORPWATCH_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting corpwatch");
    info!(
        alliance_id = %config.alliance_id,
        esi_url = %config.esi_url,
        data_dir = %config.data_dir.display(),
        poll_interval_secs = config.poll_interval.as_secs(),
        dry_run = config.dry_run,
        "Configuration loaded"
    );

    let esi = EsiClient::from_config(&config).context("Failed to build ESI client")?;
    let source: Arc<dyn RosterSource> =
        Arc::new(EsiRosterSource::new(esi.clone(), config.alliance_id));
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(config.snapshot_path()));
    let notifier = build_notifier(&config, esi)?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watcher = Watcher::new(
        config.alliance_id,
        source,
        store,
        notifier,
        WatcherConfig::from(&config),
        shutdown_rx,
    )
    .with_context(|| {
        format!(
            "Refusing to start with snapshot {}",
            config.snapshot_path().display()
        )
    })?;

    let mut watcher_handle = tokio::spawn(watcher.run());

    // Wait for shutdown signal
    let result = tokio::select! {
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            (&mut watcher_handle).await
        }
        result = &mut watcher_handle => result,
    };

    match result {
        Ok(Ok(())) => {
            info!("corpwatch shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Watcher stopped");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "Watcher task panicked");
            Err(e.into())
        }
    }
}

fn build_notifier(config: &Config, esi: EsiClient) -> Result<Arc<dyn Notifier>> {
    if config.dry_run {
        info!("Dry run: events will be logged, not posted");
        return Ok(Arc::new(LogNotifier::new(config.alliance_id)));
    }

    let channel_id = config
        .channel_id
        .context("CORPWATCH_CHANNEL_ID is required unless CORPWATCH_DRY_RUN is set")?;
    let token = config
        .discord_token
        .clone()
        .context("DISCORD_TOKEN is required unless CORPWATCH_DRY_RUN is set")?;

    let notifier = DiscordNotifier::new(
        config.discord_url.clone(),
        token,
        channel_id,
        config.alliance_id,
        Arc::new(InformationCache::new(esi)),
        config.call_timeout,
    )
    .context("Failed to build Discord client")?
    .with_min_member_count(config.min_member_count);

    Ok(Arc::new(notifier))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

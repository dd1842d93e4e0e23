//! `relwatch` daemon.
//!
//! Reads its configuration from the environment (see [`relwatch::EnvConfig`]),
//! keeps its state in `RELWATCH_DATA_DIR` and checks all watched repositories
//! on the interval stored in the settings document until interrupted.
//!
//! Log verbosity is controlled with `RELWATCH_LOG` (e.g. `relwatch=debug`).

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use relwatch::{
    http_client, EnvConfig, JsonFileStore, NotificationDispatcher, PollingScheduler,
    ProviderRegistry, ReleaseChecker, ReleaseWatcher,
};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env("RELWATCH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = EnvConfig::from_env().context("invalid configuration")?;
    let client = http_client(config.request_timeout)?;

    let store = Arc::new(
        JsonFileStore::open(&config.data_dir)
            .await
            .with_context(|| format!("cannot open data directory {}", config.data_dir.display()))?,
    );
    let providers = ProviderRegistry::from_config(&config, client.clone())?;
    let dispatcher = NotificationDispatcher::from_config(&config, client);

    let channels = dispatcher.configured_channels();
    if channels.is_empty() {
        info!("No notification channels configured; releases will only be recorded");
    } else {
        info!(channels = ?channels, "Notification channels configured");
    }

    let watcher = Arc::new(ReleaseWatcher::new(
        store.clone(),
        store,
        ReleaseChecker::new(providers),
        dispatcher,
    ));
    let scheduler = PollingScheduler::new(watcher);
    scheduler.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    scheduler.stop().await;

    Ok(())
}

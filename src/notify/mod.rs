//! Notification fan-out.
//!
//! This module provides the channels a new release is announced through:
//! - Email (SMTP)
//! - Generic push webhook (HTTP POST to `{base}/notify`)

mod email;
pub mod format;
mod webhook;

pub use email::{EmailChannel, EmailConfig};
pub use webhook::{notify_url, WebhookChannel};

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error, info};

use crate::config::EnvConfig;
use crate::error::{ReleaseWatchError, Result};
use crate::repo::RepoRef;
use crate::settings::{EffectiveSettings, NotificationFormat};
use crate::types::{Release, Repository};

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Whether the channel has everything it needs to send.
    fn is_configured(&self) -> bool;

    /// Send a notification through this channel.
    async fn send(&self, notification: &ReleaseNotification) -> Result<()>;
}

/// Everything a channel needs to announce one release.
#[derive(Debug, Clone)]
pub struct ReleaseNotification {
    /// `owner/repo`
    pub repo_name: String,
    pub repo_url: String,
    pub release: Release,
    /// Body format for channels that send a single body.
    pub format: NotificationFormat,
    /// Routing tag(s) for the webhook channel.
    pub tags: Option<String>,
    /// Character budget for text and markdown bodies, 0 for unlimited.
    pub max_characters: usize,
    pub locale: String,
}

impl ReleaseNotification {
    pub fn new(
        repository: &Repository,
        release: &Release,
        settings: &EffectiveSettings,
        locale: &str,
    ) -> Self {
        let (repo_name, repo_url) = match RepoRef::parse(&repository.url) {
            Ok(repo) => (repo.full_name(), repo.canonical_url()),
            Err(_) => (repository.id.clone(), repository.url.clone()),
        };

        Self {
            repo_name,
            repo_url,
            release: release.clone(),
            format: settings.notification_format,
            tags: settings.notification_tags.clone(),
            max_characters: settings.notification_max_characters,
            locale: locale.to_string(),
        }
    }
}

/// Sends a notification to every configured channel concurrently.
#[derive(Default, Clone)]
pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Email and webhook channels from environment configuration.
    pub fn from_config(config: &EnvConfig, client: reqwest::Client) -> Self {
        Self::new()
            .with_channel(EmailChannel::new(config.email.clone()))
            .with_channel(WebhookChannel::new(config.webhook_url.clone(), client))
    }

    pub fn with_channel(mut self, channel: impl NotificationChannel + 'static) -> Self {
        self.channels.push(Arc::new(channel));
        self
    }

    pub fn configured_channels(&self) -> Vec<&'static str> {
        self.channels
            .iter()
            .filter(|c| c.is_configured())
            .map(|c| c.channel_type())
            .collect()
    }

    /// Dispatches to all configured channels and returns how many delivered.
    ///
    /// Every configured channel is attempted. If any of them fails the call
    /// fails with the names of the failed channels. Having no configured
    /// channel is not an error.
    pub async fn dispatch(&self, notification: &ReleaseNotification) -> Result<usize> {
        let configured: Vec<_> = self.channels.iter().filter(|c| c.is_configured()).collect();
        if configured.is_empty() {
            info!(
                repo = %notification.repo_name,
                tag = %notification.release.tag_name,
                "No notification channels configured, skipping"
            );
            return Ok(0);
        }

        let results = join_all(configured.iter().map(|channel| async move {
            (channel.channel_type(), channel.send(notification).await)
        }))
        .await;

        let mut failed_channels = Vec::new();
        for (channel, result) in results {
            match result {
                Ok(()) => debug!(channel, repo = %notification.repo_name, "Notification sent"),
                Err(e) => {
                    error!(channel, repo = %notification.repo_name, error = %e, "Notification failed");
                    failed_channels.push(channel.to_string());
                }
            }
        }

        if failed_channels.is_empty() {
            Ok(configured.len())
        } else {
            Err(ReleaseWatchError::Notification { failed_channels })
        }
    }
}

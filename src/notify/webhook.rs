//! Generic push webhook channel.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::{format, NotificationChannel, ReleaseNotification};
use crate::error::Result;

const NOTIFY_PATH: &str = "/notify";

/// Appends `/notify` to `base` unless it is already there.
///
/// ```
/// use relwatch::notify_url;
///
/// assert_eq!(notify_url("https://push.example.com/"), "https://push.example.com/notify");
/// assert_eq!(notify_url("https://push.example.com/notify"), "https://push.example.com/notify");
/// ```
pub fn notify_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.ends_with(NOTIFY_PATH) {
        base.to_string()
    } else {
        format!("{base}{NOTIFY_PATH}")
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    title: String,
    body: String,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
}

pub struct WebhookChannel {
    url: Option<String>,
    client: Client,
}

impl WebhookChannel {
    /// Create a webhook channel. A missing or blank base URL leaves it unconfigured.
    pub fn new(base_url: Option<String>, client: Client) -> Self {
        let url = base_url
            .filter(|u| !u.trim().is_empty())
            .map(|u| notify_url(&u));
        Self { url, client }
    }

    fn build_payload<'a>(&self, n: &'a ReleaseNotification) -> WebhookPayload<'a> {
        WebhookPayload {
            title: format::title(n),
            body: format::body(n, n.format, n.max_characters),
            format: n.format.as_str(),
            tag: n.tags.as_deref().filter(|t| !t.trim().is_empty()),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn channel_type(&self) -> &'static str {
        "webhook"
    }

    fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    async fn send(&self, notification: &ReleaseNotification) -> Result<()> {
        let Some(url) = &self.url else {
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&self.build_payload(notification))
            .send()
            .await?;

        if let Err(e) = response.error_for_status_ref() {
            warn!(url = %url, status = %response.status(), "Webhook rejected notification");
            return Err(e.into());
        }

        debug!(url = %url, repo = %notification.repo_name, "Webhook notification sent");
        Ok(())
    }
}

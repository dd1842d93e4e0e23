//! Email notification channel using SMTP.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::{format, NotificationChannel, ReleaseNotification};
use crate::error::{ReleaseWatchError, Result};

/// Port on which SMTP servers expect implicit TLS.
const SMTPS_PORT: u16 = 465;

/// SMTP submission settings.
#[derive(Debug, Clone, Default)]
pub struct EmailConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    /// Display name of the sender.
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    /// Implicit TLS on port 465, STARTTLS on any other port.
    pub secure: bool,
    pub timeout: Duration,
}

impl EmailConfig {
    /// Host, port, sender and at least one recipient are required.
    pub fn is_configured(&self) -> bool {
        self.host.is_some()
            && self.port.is_some()
            && self.from_address.is_some()
            && !self.to_addresses.is_empty()
    }
}

/// Email notification channel.
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Build a multipart message with a text and an HTML alternative.
    fn build_message(&self, n: &ReleaseNotification) -> Result<Message> {
        let from_address = self.config.from_address.as_deref().unwrap_or_default();
        let from = Mailbox::new(
            self.config.from_name.clone(),
            from_address
                .parse::<Address>()
                .map_err(ReleaseWatchError::email)?,
        );

        let mut builder = Message::builder().from(from).subject(format::title(n));
        for to in &self.config.to_addresses {
            builder = builder.to(to.parse::<Mailbox>().map_err(ReleaseWatchError::email)?);
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                format::text(n, 0),
                format::html_document(n),
            ))
            .map_err(ReleaseWatchError::email)
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let host = self.config.host.as_deref().unwrap_or_default();
        let port = self.config.port.unwrap_or(SMTPS_PORT);

        let builder = if self.config.secure && port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(ReleaseWatchError::email)?
        } else if self.config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(ReleaseWatchError::email)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };

        let mut builder = builder.port(port).timeout(Some(self.config.timeout));
        if let Some(username) = &self.config.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                self.config.password.clone().unwrap_or_default(),
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn channel_type(&self) -> &'static str {
        "email"
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn send(&self, notification: &ReleaseNotification) -> Result<()> {
        if !self.is_configured() {
            return Ok(());
        }

        let message = self.build_message(notification)?;
        self.transport()?
            .send(message)
            .await
            .map_err(ReleaseWatchError::email)?;

        debug!(
            repo = %notification.repo_name,
            recipients = self.config.to_addresses.len(),
            "Email notification sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::NotificationFormat;
    use crate::types::Release;

    fn config() -> EmailConfig {
        EmailConfig {
            host: Some("smtp.example.com".to_string()),
            port: Some(587),
            from_address: Some("bot@example.com".to_string()),
            from_name: Some("Release Bot".to_string()),
            to_addresses: vec!["me@example.com".to_string()],
            timeout: Duration::from_secs(5),
            ..EmailConfig::default()
        }
    }

    fn notification() -> ReleaseNotification {
        ReleaseNotification {
            repo_name: "o/r".to_string(),
            repo_url: "https://github.com/o/r".to_string(),
            release: Release::synthesized(
                "https://github.com/o/r/releases/tag/v1".to_string(),
                "v1".to_string(),
                Some("notes".to_string()),
                None,
            ),
            format: NotificationFormat::Markdown,
            tags: None,
            max_characters: 0,
            locale: "en".to_string(),
        }
    }

    #[test]
    fn test_email_config_default() {
        let config = EmailConfig::default();
        assert!(!config.is_configured());
    }

    #[test]
    fn test_configured_requires_recipient() {
        let mut config = config();
        assert!(config.is_configured());

        config.to_addresses.clear();
        assert!(!config.is_configured());
    }

    #[test]
    fn test_build_message() {
        let channel = EmailChannel::new(config());
        let message = channel.build_message(&notification()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: New release: o/r v1"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("Release Bot"));
    }

    #[test]
    fn test_invalid_recipient_is_rejected() {
        let mut config = config();
        config.to_addresses = vec!["not an address".to_string()];
        let channel = EmailChannel::new(config);

        let Err(ReleaseWatchError::Email(_)) = channel.build_message(&notification()) else {
            panic!("Expected Email error");
        };
    }
}

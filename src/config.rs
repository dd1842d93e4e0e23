//! Environment-level configuration.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `GITHUB_ACCESS_TOKEN` | GitHub API token |
//! | `CODEBERG_ACCESS_TOKEN` | Codeberg API token |
//! | `GITHUB_API_URL`, `CODEBERG_API_URL` | API root overrides |
//! | `NOTIFY_WEBHOOK_URL` | Base URL of the push webhook (`/notify` is appended) |
//! | `MAIL_HOST`, `MAIL_PORT` | SMTP server |
//! | `MAIL_USERNAME`, `MAIL_PASSWORD` | SMTP credentials |
//! | `MAIL_FROM_ADDRESS`, `MAIL_FROM_NAME` | Sender |
//! | `MAIL_TO_ADDRESS` | Comma-separated recipients |
//! | `MAIL_SECURE` | `true` for TLS (implicit on port 465, STARTTLS otherwise) |
//! | `RELWATCH_DATA_DIR` | Directory holding `repositories.json` and `settings.json` |
//! | `RELWATCH_REQUEST_TIMEOUT_SECS` | HTTP request timeout, default 30 |

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ReleaseWatchError, Result};
use crate::notify::EmailConfig;
use crate::provider::USER_AGENT;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub github_token: Option<String>,
    pub codeberg_token: Option<String>,
    pub github_api_url: Option<String>,
    pub codeberg_api_url: Option<String>,
    pub webhook_url: Option<String>,
    pub email: EmailConfig,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mail_port = var("MAIL_PORT")
            .map(|p| {
                p.parse::<u16>()
                    .map_err(|_| ReleaseWatchError::Config(format!("MAIL_PORT is not a port: {p}")))
            })
            .transpose()?;

        let request_timeout_secs = var("RELWATCH_REQUEST_TIMEOUT_SECS")
            .map(|s| {
                s.parse::<u64>().map_err(|_| {
                    ReleaseWatchError::Config(format!(
                        "RELWATCH_REQUEST_TIMEOUT_SECS is not a number: {s}"
                    ))
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let email = EmailConfig {
            host: var("MAIL_HOST"),
            port: mail_port,
            username: var("MAIL_USERNAME"),
            password: var("MAIL_PASSWORD"),
            from_address: var("MAIL_FROM_ADDRESS"),
            from_name: var("MAIL_FROM_NAME"),
            to_addresses: var("MAIL_TO_ADDRESS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            secure: var("MAIL_SECURE").is_some_and(|v| matches!(v.as_str(), "true" | "1" | "yes")),
            timeout: Duration::from_secs(request_timeout_secs),
        };

        Ok(Self {
            github_token: var("GITHUB_ACCESS_TOKEN"),
            codeberg_token: var("CODEBERG_ACCESS_TOKEN"),
            github_api_url: var("GITHUB_API_URL"),
            codeberg_api_url: var("CODEBERG_API_URL"),
            webhook_url: var("NOTIFY_WEBHOOK_URL"),
            email,
            data_dir: var("RELWATCH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }
}

/// Builds the shared HTTP client with an explicit request timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

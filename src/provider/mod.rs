//! Forge release APIs.
//!
//! Each forge implements [`ReleaseProvider`] with its own endpoints, auth
//! scheme and quirks. The forge-independent algorithm (pagination, filtering,
//! tag fallback) lives in [`crate::fetcher`].

mod codeberg;
mod github;

pub use codeberg::CodebergProvider;
pub use github::GitHubProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::classifier;
use crate::config::EnvConfig;
use crate::error::Result;
use crate::repo::{ProviderKind, RepoRef};
use crate::types::{FetchError, Release};

/// Result of a provider call.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

pub(crate) const USER_AGENT: &str = concat!("relwatch/", env!("CARGO_PKG_VERSION"));

/// One page of a release listing.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleasePage {
    /// The conditional request matched the stored ETag.
    NotModified,
    Fetched {
        releases: Vec<Release>,
        etag: Option<String>,
    },
}

/// The most recent tag of a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct TagInfo {
    pub name: String,
    pub commit_sha: String,
    /// Message and date of an annotated tag.
    pub annotation: Option<CommitInfo>,
}

/// A commit (or annotated tag) message with its date.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub message: String,
    pub date: Option<DateTime<Utc>>,
}

/// Release API of a single forge.
#[async_trait]
pub trait ReleaseProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Largest page the forge serves.
    fn max_page_size(&self) -> u32 {
        100
    }

    /// Whether the forge can disable releases on an existing repository, in
    /// which case a 404 on the release list does not mean the repository is gone.
    fn releases_may_be_disabled(&self) -> bool {
        false
    }

    /// Lists releases, newest first. `etag` is sent as `If-None-Match`.
    async fn list_releases(
        &self,
        repo: &RepoRef,
        page: u32,
        per_page: u32,
        etag: Option<&str>,
    ) -> FetchResult<ReleasePage>;

    async fn repository_exists(&self, repo: &RepoRef) -> FetchResult<bool>;

    async fn latest_tag(&self, repo: &RepoRef) -> FetchResult<Option<TagInfo>>;

    /// Looks up a commit by SHA or ref name.
    async fn commit(&self, repo: &RepoRef, reference: &str) -> FetchResult<Option<CommitInfo>>;

    fn tag_url(&self, repo: &RepoRef, tag: &str) -> String {
        format!("{}/releases/tag/{}", repo.canonical_url(), tag)
    }
}

/// Providers keyed by forge.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn ReleaseProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the GitHub and Codeberg providers from environment configuration.
    pub fn from_config(config: &EnvConfig, client: reqwest::Client) -> Result<Self> {
        let mut github = GitHubProvider::new(client.clone(), config.github_token.clone());
        if let Some(url) = &config.github_api_url {
            github = github.with_base_url(url)?;
        }
        let mut codeberg = CodebergProvider::new(client, config.codeberg_token.clone());
        if let Some(url) = &config.codeberg_api_url {
            codeberg = codeberg.with_base_url(url)?;
        }

        Ok(Self::new().with(github).with(codeberg))
    }

    pub fn with(mut self, provider: impl ReleaseProvider + 'static) -> Self {
        self.register(Arc::new(provider));
        self
    }

    pub fn register(&mut self, provider: Arc<dyn ReleaseProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ReleaseProvider>> {
        self.providers.get(&kind).cloned()
    }
}

/// Maps a failed HTTP status to a fetch error.
pub(crate) fn status_error(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    repo: &RepoRef,
) -> FetchError {
    match status.as_u16() {
        404 => FetchError::RepoNotFound,
        401 | 403 | 429 => {
            log_rate_limit(status, headers, repo);
            FetchError::RateLimit
        }
        code => FetchError::api(Some(code), body.trim().to_string()),
    }
}

fn log_rate_limit(status: StatusCode, headers: &HeaderMap, repo: &RepoRef) {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let remaining = header("x-ratelimit-remaining");
    let reset = header("x-ratelimit-reset")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
    let retry_after = header("retry-after");

    if remaining == Some("0") || retry_after.is_some() {
        warn!(
            repo = %repo,
            status = status.as_u16(),
            reset = ?reset,
            retry_after,
            "Rate limit exhausted"
        );
    } else {
        warn!(
            repo = %repo,
            status = status.as_u16(),
            remaining,
            "Request rejected by forge, check the access token"
        );
    }
}

/// Maps a transport failure to a fetch error, logging whether it is transient.
pub(crate) fn transport_error(err: reqwest::Error, repo: &RepoRef) -> FetchError {
    let retryable = classifier::classify(&err).is_retryable();
    warn!(repo = %repo, error = %err, retryable, "Request to forge failed");
    FetchError::api(None, err.to_string())
}

/// Builds `{base}/repos/{owner}/{repo}/{segments..}`, percent-encoding each
/// segment so tag names with `#`, `?` or `%` address the right resource.
pub(crate) fn repo_api_url(base: &str, repo: &RepoRef, segments: &[&str]) -> FetchResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| FetchError::api(None, format!("invalid API URL {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| FetchError::api(None, format!("API URL {base} cannot carry a path")))?
        .pop_if_empty()
        .push("repos")
        .push(&repo.owner)
        .push(&repo.repo)
        .extend(segments);
    Ok(url)
}

pub(crate) fn etag_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Reads a JSON body, mapping failures to `api_error`.
pub(crate) async fn json_body<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    repo: &RepoRef,
) -> FetchResult<T> {
    let status = response.status().as_u16();
    response.json::<T>().await.map_err(|e| {
        debug!(repo = %repo, error = %e, "Unexpected response body");
        FetchError::api(Some(status), format!("invalid response body: {e}"))
    })
}

/// Reads the error body of a failed response.
pub(crate) async fn failure(response: reqwest::Response, repo: &RepoRef) -> FetchError {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    status_error(status, &headers, &body, repo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_api_url_encodes_segments() {
        let repo = RepoRef::parse("o/r").unwrap();

        let segments = ["git", "ref", "tags", "v1#2?x%"];
        let url = repo_api_url("https://api.github.com", &repo, &segments).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/o/r/git/ref/tags/v1%232%3Fx%25"
        );

        let url = repo_api_url("https://ghe.example.com/api/v3", &repo, &[]).unwrap();
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/repos/o/r");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::{EffectiveSettings, RepoOverrides};

/// A repository being watched for releases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Normalized `provider:owner/repo` identifier.
    pub id: String,
    /// Canonical web URL of the repository.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_release_tag: Option<String>,
    /// Conditional-request token from the last release list response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// A new release was detected and not yet acknowledged.
    #[serde(default)]
    pub is_new: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_release: Option<CachedRelease>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<RepoOverrides>,
}

impl Repository {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            last_seen_release_tag: None,
            etag: None,
            is_new: false,
            latest_release: None,
            overrides: None,
        }
    }
}

/// A forge release, or a release synthesized from a tag or commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Forge release id. Always 0 for synthesized releases.
    pub id: u64,
    pub html_url: String,
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub prerelease: bool,
    pub draft: bool,
    pub fetched_at: DateTime<Utc>,
}

impl Release {
    /// Builds a pseudo-release from a VCS tag.
    pub fn synthesized(
        html_url: String,
        tag_name: String,
        body: Option<String>,
        date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: 0,
            html_url,
            name: Some(tag_name.clone()),
            tag_name,
            body,
            created_at: date,
            published_at: date,
            prerelease: false,
            draft: false,
            fetched_at: Utc::now(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.tag_name)
    }

    pub(crate) fn has_body(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.trim().is_empty())
    }

    /// Timestamp used to order releases newest first.
    pub(crate) fn sort_key(&self) -> Option<DateTime<Utc>> {
        self.published_at.or(self.created_at)
    }
}

/// The reduced release projection persisted with each repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRelease {
    #[serde(default)]
    pub id: u64,
    pub html_url: String,
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    pub fetched_at: DateTime<Utc>,
}

impl From<&Release> for CachedRelease {
    fn from(release: &Release) -> Self {
        Self {
            id: release.id,
            html_url: release.html_url.clone(),
            tag_name: release.tag_name.clone(),
            name: release.name.clone(),
            body: release.body.clone(),
            created_at: release.created_at,
            published_at: release.published_at,
            prerelease: release.prerelease,
            draft: release.draft,
            fetched_at: release.fetched_at,
        }
    }
}

impl CachedRelease {
    /// Rebuilds a release view, stamped with a fresh fetch time.
    pub fn to_release(&self) -> Release {
        Release {
            id: self.id,
            html_url: self.html_url.clone(),
            tag_name: self.tag_name.clone(),
            name: self.name.clone(),
            body: self.body.clone(),
            created_at: self.created_at,
            published_at: self.published_at,
            prerelease: self.prerelease,
            draft: self.draft,
            fetched_at: Utc::now(),
        }
    }

    /// Equality ignoring the fetch timestamp.
    pub(crate) fn same_release(&self, other: &CachedRelease) -> bool {
        self.id == other.id
            && self.html_url == other.html_url
            && self.tag_name == other.tag_name
            && self.name == other.name
            && self.body == other.body
            && self.created_at == other.created_at
            && self.published_at == other.published_at
            && self.prerelease == other.prerelease
            && self.draft == other.draft
    }
}

/// Why a repository check did not produce a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchError {
    RateLimit,
    RepoNotFound,
    NoReleasesFound,
    NoMatchingReleases,
    InvalidUrl,
    ApiError {
        status: Option<u16>,
        message: String,
    },
    NotModified,
}

impl FetchError {
    pub(crate) fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "rate limit exceeded"),
            Self::RepoNotFound => write!(f, "repository not found"),
            Self::NoReleasesFound => write!(f, "no releases or tags found"),
            Self::NoMatchingReleases => write!(f, "no release matches the configured filters"),
            Self::InvalidUrl => write!(f, "invalid repository URL"),
            Self::ApiError {
                status: Some(status),
                message,
            } => write!(f, "API error {status}: {message}"),
            Self::ApiError {
                status: None,
                message,
            } => write!(f, "API error: {message}"),
            Self::NotModified => write!(f, "not modified"),
        }
    }
}

/// Result of one provider fetch: a release or an error, plus the ETag to store.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub result: std::result::Result<Release, FetchError>,
    pub etag: Option<String>,
}

impl FetchOutcome {
    pub(crate) fn error(error: FetchError) -> Self {
        Self {
            result: Err(error),
            etag: None,
        }
    }
}

/// Per-repository output of a check.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedRelease {
    pub repo_id: String,
    pub release: Option<Release>,
    pub error: Option<FetchError>,
    pub new_etag: Option<String>,
    pub settings: EffectiveSettings,
}

/// Options for a check cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    /// Bypass the release cache.
    pub skip_cache: bool,
}

/// Summary of a check cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    /// Releases for which at least one channel delivered a notification.
    pub notifications_sent: usize,
    pub checked: usize,
}

/// Summary of adding repositories by URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddSummary {
    pub added: usize,
    pub skipped: usize,
    pub invalid: Vec<String>,
}

/// Summary of importing a repository list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub added: usize,
    pub updated: usize,
}

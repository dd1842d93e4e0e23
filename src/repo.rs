use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ReleaseWatchError, Result};

/// A release-hosting forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    GitHub,
    Codeberg,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::Codeberg => "codeberg",
        }
    }

    pub fn web_host(&self) -> &'static str {
        match self {
            Self::GitHub => "github.com",
            Self::Codeberg => "codeberg.org",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::GitHub => "GitHub",
            Self::Codeberg => "Codeberg",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "github" => Some(Self::GitHub),
            "codeberg" => Some(Self::Codeberg),
            _ => None,
        }
    }

    fn from_host(host: &str) -> Option<Self> {
        let host = host.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        match host {
            "github.com" => Some(Self::GitHub),
            "codeberg.org" => Some(Self::Codeberg),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed repository reference: forge, owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub provider: ProviderKind,
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    /// Parses a repository URL or identifier.
    ///
    /// Accepts web URLs (`https://github.com/owner/repo`, optionally with a
    /// `.git` suffix or further path segments), prefixed identifiers
    /// (`codeberg:owner/repo`) and bare `owner/repo`, which means GitHub.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || ReleaseWatchError::InvalidRepoUrl(input.to_string());

        let (provider, path) = if input.contains("://") {
            let url = Url::parse(input).map_err(|_| invalid())?;
            let provider = url
                .host_str()
                .and_then(ProviderKind::from_host)
                .ok_or_else(invalid)?;
            (provider, url.path().to_string())
        } else if let Some((prefix, rest)) = input.split_once(':') {
            (ProviderKind::from_prefix(prefix).ok_or_else(invalid)?, rest.to_string())
        } else {
            (ProviderKind::GitHub, input.to_string())
        };

        let mut segments = path.trim_matches('/').split('/');
        let owner = segments.next().unwrap_or_default();
        let name = segments.next().unwrap_or_default();
        let name = name.strip_suffix(".git").unwrap_or(name);

        // Only URLs may carry extra segments such as `/releases`.
        if !input.contains("://") && segments.next().is_some() {
            return Err(invalid());
        }

        let valid = match provider {
            ProviderKind::GitHub => is_valid_github_owner(owner) && is_valid_repo_name(name),
            ProviderKind::Codeberg => is_valid_codeberg_owner(owner) && is_valid_repo_name(name),
        };
        if !valid {
            return Err(invalid());
        }

        Ok(Self {
            provider,
            owner: owner.to_string(),
            repo: name.to_string(),
        })
    }

    /// Normalized `provider:owner/repo` identifier.
    pub fn id(&self) -> String {
        format!("{}:{}", self.provider, self.full_name()).to_lowercase()
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn canonical_url(&self) -> String {
        format!("https://{}/{}/{}", self.provider.web_host(), self.owner, self.repo)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.provider, self.owner, self.repo)
    }
}

/// Normalizes a stored identifier, migrating legacy unprefixed ids to GitHub.
pub fn normalize_repository_id(id: &str) -> String {
    let id = id.trim();
    match id.split_once(':') {
        Some((prefix, _)) if ProviderKind::from_prefix(prefix).is_some() => id.to_lowercase(),
        _ => format!("{}:{}", ProviderKind::GitHub, id).to_lowercase(),
    }
}

/// Maximum length for a GitHub username/organization name.
/// This limit is enforced by GitHub.
const MAX_GITHUB_OWNER_LENGTH: usize = 39;

/// Maximum length for a Codeberg (Gitea) user or organization name.
const MAX_CODEBERG_OWNER_LENGTH: usize = 40;

/// Maximum length for a repository name.
const MAX_REPO_NAME_LENGTH: usize = 100;

fn is_valid_github_owner(owner: &str) -> bool {
    !owner.is_empty()
        && owner.len() <= MAX_GITHUB_OWNER_LENGTH
        && !owner.starts_with('-')
        && !owner.ends_with('-')
        && owner.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

// Gitea also allows dots and underscores in user names.
fn is_valid_codeberg_owner(owner: &str) -> bool {
    !owner.is_empty()
        && owner.len() <= MAX_CODEBERG_OWNER_LENGTH
        && owner.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !owner.starts_with(['-', '.'])
}

fn is_valid_repo_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_REPO_NAME_LENGTH
        && name != "."
        && name != ".."
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

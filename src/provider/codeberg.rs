use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{
    etag_of, failure, json_body, repo_api_url, transport_error, CommitInfo, FetchResult,
    ReleasePage, ReleaseProvider, TagInfo, USER_AGENT,
};
use crate::error::{ReleaseWatchError, Result};
use crate::repo::{ProviderKind, RepoRef};
use crate::types::Release;

const DEFAULT_CODEBERG_API_URL: &str = "https://codeberg.org/api/v1";

/// Codeberg's default `MAX_RESPONSE_ITEMS`.
const CODEBERG_MAX_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Copy)]
enum AuthScheme {
    Token,
    Bearer,
}

/// Codeberg (Gitea/Forgejo API) release provider.
pub struct CodebergProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl CodebergProvider {
    pub fn new(client: Client, token: Option<String>) -> Self {
        Self {
            client,
            base_url: DEFAULT_CODEBERG_API_URL.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if Url::parse(&url).is_err() {
            return Err(ReleaseWatchError::InvalidBaseUrl(url));
        }
        self.base_url = url.trim_end_matches('/').to_string();
        Ok(self)
    }

    fn repo_url(&self, repo: &RepoRef, segments: &[&str]) -> FetchResult<Url> {
        repo_api_url(&self.base_url, repo, segments)
    }

    fn get(&self, url: &Url, auth: AuthScheme) -> RequestBuilder {
        let request = self
            .client
            .get(url.clone())
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT);

        match (&self.token, auth) {
            (Some(token), AuthScheme::Token) => {
                request.header("Authorization", format!("token {}", token))
            }
            (Some(token), AuthScheme::Bearer) => {
                request.header("Authorization", format!("Bearer {}", token))
            }
            (None, _) => request,
        }
    }

    /// Sends a GET with the `token` scheme, retrying once with `Bearer` when
    /// the forge rejects the credentials.
    async fn send<F>(&self, url: &Url, repo: &RepoRef, customize: F) -> FetchResult<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let request = customize(self.get(url, AuthScheme::Token));
        let response = request.send().await.map_err(|e| transport_error(e, repo))?;

        if response.status() != StatusCode::UNAUTHORIZED || self.token.is_none() {
            return Ok(response);
        }

        debug!(repo = %repo, "Token auth rejected, retrying with bearer scheme");
        let request = customize(self.get(url, AuthScheme::Bearer));
        request.send().await.map_err(|e| transport_error(e, repo))
    }
}

#[async_trait]
impl ReleaseProvider for CodebergProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Codeberg
    }

    fn max_page_size(&self) -> u32 {
        CODEBERG_MAX_PAGE_SIZE
    }

    fn releases_may_be_disabled(&self) -> bool {
        true
    }

    async fn list_releases(
        &self,
        repo: &RepoRef,
        page: u32,
        per_page: u32,
        etag: Option<&str>,
    ) -> FetchResult<ReleasePage> {
        let url = self.repo_url(repo, &["releases"])?;
        let response = self
            .send(&url, repo, |request| {
                let request = request.query(&[("limit", per_page), ("page", page)]);
                match etag {
                    Some(etag) => request.header("If-None-Match", etag),
                    None => request,
                }
            })
            .await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(ReleasePage::NotModified);
        }
        if !response.status().is_success() {
            return Err(failure(response, repo).await);
        }

        let etag = etag_of(response.headers());
        let codeberg_releases: Vec<CodebergReleaseResponse> = json_body(response, repo).await?;
        let releases = codeberg_releases.into_iter().map(Release::from).collect();

        Ok(ReleasePage::Fetched { releases, etag })
    }

    async fn repository_exists(&self, repo: &RepoRef) -> FetchResult<bool> {
        let response = self.send(&self.repo_url(repo, &[])?, repo, |r| r).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(failure(response, repo).await),
        }
    }

    async fn latest_tag(&self, repo: &RepoRef) -> FetchResult<Option<TagInfo>> {
        let url = self.repo_url(repo, &["tags"])?;
        let response = self
            .send(&url, repo, |r| r.query(&[("limit", 1), ("page", 1)]))
            .await?;
        if !response.status().is_success() {
            return Err(failure(response, repo).await);
        }

        let tags: Vec<CodebergTagResponse> = json_body(response, repo).await?;
        let Some(tag) = tags.into_iter().next() else {
            return Ok(None);
        };

        // Gitea inlines the annotated tag message.
        let annotation = tag
            .message
            .filter(|m| !m.trim().is_empty())
            .map(|message| CommitInfo {
                message,
                date: tag.commit.created,
            });

        Ok(Some(TagInfo {
            name: tag.name,
            commit_sha: tag.commit.sha,
            annotation,
        }))
    }

    async fn commit(&self, repo: &RepoRef, reference: &str) -> FetchResult<Option<CommitInfo>> {
        let url = self.repo_url(repo, &["git", "commits", reference])?;
        let response = self.send(&url, repo, |r| r).await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => return Ok(None),
            _ => return Err(failure(response, repo).await),
        }

        let commit: CodebergCommitResponse = json_body(response, repo).await?;
        Ok(Some(CommitInfo {
            message: commit.commit.message,
            date: commit
                .commit
                .committer
                .and_then(|c| c.date)
                .or(commit.created),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct CodebergReleaseResponse {
    id: u64,
    tag_name: String,
    name: Option<String>,
    body: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    html_url: String,
    created_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
}

impl From<CodebergReleaseResponse> for Release {
    fn from(response: CodebergReleaseResponse) -> Self {
        Self {
            id: response.id,
            html_url: response.html_url,
            tag_name: response.tag_name,
            name: response.name,
            body: response.body,
            created_at: response.created_at,
            published_at: response.published_at,
            prerelease: response.prerelease,
            draft: response.draft,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CodebergTagResponse {
    name: String,
    message: Option<String>,
    commit: CodebergTagCommit,
}

#[derive(Debug, Deserialize)]
struct CodebergTagCommit {
    sha: String,
    created: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CodebergCommitResponse {
    created: Option<DateTime<Utc>>,
    commit: CodebergCommitDetail,
}

#[derive(Debug, Deserialize)]
struct CodebergCommitDetail {
    message: String,
    committer: Option<CodebergSignature>,
}

#[derive(Debug, Deserialize)]
struct CodebergSignature {
    date: Option<DateTime<Utc>>,
}

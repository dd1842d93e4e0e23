use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
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

const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub REST API release provider.
pub struct GitHubProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubProvider {
    pub fn new(client: Client, token: Option<String>) -> Self {
        Self {
            client,
            base_url: DEFAULT_GITHUB_API_URL.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Uses a different API root, e.g. a GitHub Enterprise instance.
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

    fn get(&self, url: Url) -> RequestBuilder {
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", USER_AGENT);

        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        request
    }

    async fn send(&self, request: RequestBuilder, repo: &RepoRef) -> FetchResult<reqwest::Response> {
        request.send().await.map_err(|e| transport_error(e, repo))
    }

    /// Resolves the message of an annotated tag. Lightweight tags yield `None`.
    async fn tag_annotation(&self, repo: &RepoRef, tag: &str) -> FetchResult<Option<CommitInfo>> {
        let url = self.repo_url(repo, &["git", "ref", "tags", tag])?;
        let response = self.send(self.get(url), repo).await?;
        if !response.status().is_success() {
            debug!(repo = %repo, tag, status = %response.status(), "Tag ref lookup failed");
            return Ok(None);
        }

        let reference: GitHubRefResponse = json_body(response, repo).await?;
        if reference.object.kind != "tag" {
            return Ok(None);
        }

        let url = self.repo_url(repo, &["git", "tags", reference.object.sha.as_str()])?;
        let response = self.send(self.get(url), repo).await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let tag: GitHubTagObjectResponse = json_body(response, repo).await?;
        Ok(Some(CommitInfo {
            message: tag.message,
            date: tag.tagger.and_then(|t| t.date),
        }))
    }
}

#[async_trait]
impl ReleaseProvider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn list_releases(
        &self,
        repo: &RepoRef,
        page: u32,
        per_page: u32,
        etag: Option<&str>,
    ) -> FetchResult<ReleasePage> {
        let url = self.repo_url(repo, &["releases"])?;
        let mut request = self
            .get(url)
            .query(&[("per_page", per_page), ("page", page)]);
        if let Some(etag) = etag {
            request = request.header("If-None-Match", etag);
        }

        let response = self.send(request, repo).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(ReleasePage::NotModified);
        }
        if !response.status().is_success() {
            return Err(failure(response, repo).await);
        }

        let etag = etag_of(response.headers());
        let github_releases: Vec<GitHubReleaseResponse> = json_body(response, repo).await?;
        let releases = github_releases.into_iter().map(Release::from).collect();

        Ok(ReleasePage::Fetched { releases, etag })
    }

    async fn repository_exists(&self, repo: &RepoRef) -> FetchResult<bool> {
        let response = self.send(self.get(self.repo_url(repo, &[])?), repo).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(failure(response, repo).await),
        }
    }

    async fn latest_tag(&self, repo: &RepoRef) -> FetchResult<Option<TagInfo>> {
        let url = self.repo_url(repo, &["tags"])?;
        let request = self.get(url).query(&[("per_page", 1)]);
        let response = self.send(request, repo).await?;
        if !response.status().is_success() {
            return Err(failure(response, repo).await);
        }

        let tags: Vec<GitHubTagResponse> = json_body(response, repo).await?;
        let Some(tag) = tags.into_iter().next() else {
            return Ok(None);
        };

        let annotation = self.tag_annotation(repo, &tag.name).await?;
        Ok(Some(TagInfo {
            name: tag.name,
            commit_sha: tag.commit.sha,
            annotation,
        }))
    }

    async fn commit(&self, repo: &RepoRef, reference: &str) -> FetchResult<Option<CommitInfo>> {
        let url = self.repo_url(repo, &["commits", reference])?;
        let response = self.send(self.get(url), repo).await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => return Ok(None),
            _ => return Err(failure(response, repo).await),
        }

        let commit: GitHubCommitResponse = json_body(response, repo).await?;
        Ok(Some(CommitInfo {
            message: commit.commit.message,
            date: commit.commit.committer.and_then(|c| c.date),
        }))
    }
}

/// Internal structure for GitHub API response.
#[derive(Debug, Deserialize)]
struct GitHubReleaseResponse {
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

impl From<GitHubReleaseResponse> for Release {
    fn from(response: GitHubReleaseResponse) -> Self {
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
struct GitHubTagResponse {
    name: String,
    commit: GitHubShaRef,
}

#[derive(Debug, Deserialize)]
struct GitHubShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRefResponse {
    object: GitHubRefObject,
}

#[derive(Debug, Deserialize)]
struct GitHubRefObject {
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitHubTagObjectResponse {
    message: String,
    tagger: Option<GitHubSignature>,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitResponse {
    commit: GitHubCommitDetail,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitDetail {
    message: String,
    committer: Option<GitHubSignature>,
}

#[derive(Debug, Deserialize)]
struct GitHubSignature {
    date: Option<DateTime<Utc>>,
}

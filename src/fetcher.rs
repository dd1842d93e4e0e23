//! Resolves the newest matching release of one repository.

use chrono::Utc;
use tracing::{debug, warn};

use crate::filter::select_release;
use crate::provider::{FetchResult, ReleasePage, ReleaseProvider};
use crate::repo::RepoRef;
use crate::settings::EffectiveSettings;
use crate::types::{FetchError, FetchOutcome, Release};

/// Fetches the latest release matching `settings`.
///
/// Requests `ceil(releases_per_page / page_size)` pages, stopping early on a
/// short page. Only the first page carries `etag`; a `304` on it yields
/// `not_modified` together with the unchanged `etag`. Repositories without
/// formal releases fall back to their most recent tag.
///
/// A new ETag is only returned alongside a release, so an error outcome is
/// never short-circuited by a later `304`.
pub async fn fetch_latest_release(
    provider: &dyn ReleaseProvider,
    repo: &RepoRef,
    settings: &EffectiveSettings,
    etag: Option<&str>,
) -> FetchOutcome {
    let desired = settings.releases_per_page.max(1);
    let page_size = provider.max_page_size().max(1);
    let per_page = desired.min(page_size);
    let pages = desired.div_ceil(page_size);

    let mut releases: Vec<Release> = Vec::new();
    let mut new_etag = None;

    for page in 1..=pages {
        let conditional = if page == 1 { etag } else { None };
        match provider.list_releases(repo, page, per_page, conditional).await {
            Ok(ReleasePage::NotModified) if page == 1 => {
                debug!(repo = %repo, "Release list not modified");
                return FetchOutcome {
                    result: Err(FetchError::NotModified),
                    etag: etag.map(str::to_string),
                };
            }
            Ok(ReleasePage::NotModified) => break,
            Ok(ReleasePage::Fetched { releases: batch, etag }) => {
                if page == 1 {
                    new_etag = etag;
                }
                let short_page = batch.len() < per_page as usize;
                releases.extend(batch);
                if short_page {
                    break;
                }
            }
            Err(FetchError::RepoNotFound) if page == 1 && provider.releases_may_be_disabled() => {
                return match provider.repository_exists(repo).await {
                    Ok(true) => {
                        debug!(repo = %repo, "Releases unavailable, falling back to tags");
                        outcome(tag_fallback(provider, repo).await, None)
                    }
                    Ok(false) => FetchOutcome::error(FetchError::RepoNotFound),
                    Err(e) => FetchOutcome::error(e),
                };
            }
            Err(e) if page == 1 => return FetchOutcome::error(e),
            Err(e) => {
                warn!(repo = %repo, page, error = %e, "Stopping pagination after failed page");
                break;
            }
        }
    }

    if releases.is_empty() {
        debug!(repo = %repo, "No formal releases, falling back to tags");
        return outcome(tag_fallback(provider, repo).await, new_etag);
    }

    releases.truncate(desired as usize);
    // Stable sort keeps the forge's order for equal timestamps.
    releases.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));

    let mut release = match select_release(&releases, settings) {
        Ok(release) => release.clone(),
        Err(e) => return FetchOutcome::error(e),
    };

    if !release.has_body() {
        match provider.commit(repo, &release.tag_name).await {
            Ok(Some(commit)) if !commit.message.trim().is_empty() => {
                release.body = Some(commit.message);
            }
            Ok(_) => {}
            Err(e) => debug!(repo = %repo, error = %e, "Commit message fallback failed"),
        }
    }

    outcome(Ok(release), new_etag)
}

fn outcome(result: FetchResult<Release>, etag: Option<String>) -> FetchOutcome {
    match result {
        Ok(mut release) => {
            release.fetched_at = Utc::now();
            FetchOutcome {
                result: Ok(release),
                etag,
            }
        }
        Err(e) => FetchOutcome::error(e),
    }
}

/// Synthesizes a release from the most recent tag.
///
/// Uses the annotated tag message if present, otherwise the message of the
/// tagged commit.
async fn tag_fallback(provider: &dyn ReleaseProvider, repo: &RepoRef) -> FetchResult<Release> {
    let Some(tag) = provider.latest_tag(repo).await? else {
        return Err(FetchError::NoReleasesFound);
    };

    let info = match tag.annotation.filter(|a| !a.message.trim().is_empty()) {
        Some(annotation) => annotation,
        None => provider
            .commit(repo, &tag.commit_sha)
            .await?
            .ok_or(FetchError::NoReleasesFound)?,
    };

    let body = Some(info.message).filter(|m| !m.trim().is_empty());
    Ok(Release::synthesized(
        provider.tag_url(repo, &tag.name),
        tag.name,
        body,
        info.date,
    ))
}

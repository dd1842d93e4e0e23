//! Checks a batch of repositories for their latest matching release.

use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::cache::{ReleaseCache, ReleaseCacheKey};
use crate::fetcher::fetch_latest_release;
use crate::provider::ProviderRegistry;
use crate::repo::RepoRef;
use crate::settings::{EffectiveSettings, GlobalSettings};
use crate::types::{CheckOptions, EnrichedRelease, FetchError, FetchOutcome, Repository};

/// Composes the release cache, the providers and the release filter.
pub struct ReleaseChecker {
    providers: ProviderRegistry,
    cache: ReleaseCache,
}

impl ReleaseChecker {
    pub fn new(providers: ProviderRegistry) -> Self {
        Self {
            providers,
            cache: ReleaseCache::new(),
        }
    }

    /// Drops every cached release.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    /// Returns one result per repository, in input order.
    ///
    /// At most `parallel_repo_fetches` repositories are fetched at once.
    /// Failures are reported per repository and never abort the batch.
    pub async fn get_latest_releases_for_repos(
        &self,
        repositories: &[Repository],
        settings: &GlobalSettings,
        locale: &str,
        options: CheckOptions,
    ) -> Vec<EnrichedRelease> {
        let concurrency = settings.parallel_repo_fetches.max(1);

        let checks: Vec<_> = repositories
            .iter()
            .map(|repository| self.check_repository(repository, settings, locale, options))
            .collect();

        stream::iter(checks)
            .buffered(concurrency)
            .collect()
            .await
    }

    async fn check_repository(
        &self,
        repository: &Repository,
        global: &GlobalSettings,
        locale: &str,
        options: CheckOptions,
    ) -> EnrichedRelease {
        let settings = EffectiveSettings::resolve(global, repository.overrides.as_ref());
        let mut enriched = EnrichedRelease {
            repo_id: repository.id.clone(),
            release: None,
            error: None,
            new_etag: None,
            settings: settings.clone(),
        };

        let repo = match RepoRef::parse(&repository.url).or_else(|_| RepoRef::parse(&repository.id)) {
            Ok(repo) => repo,
            Err(_) => {
                debug!(repo = %repository.id, url = %repository.url, "Unparseable repository URL");
                enriched.error = Some(FetchError::InvalidUrl);
                return enriched;
            }
        };

        let Some(provider) = self.providers.get(repo.provider) else {
            enriched.error = Some(FetchError::api(
                None,
                format!("no provider registered for {}", repo.provider),
            ));
            return enriched;
        };

        let key = ReleaseCacheKey {
            provider: repo.provider,
            repo: repo.full_name().to_lowercase(),
            locale: locale.to_string(),
            overrides: repository.overrides.clone(),
            page_size: settings.releases_per_page,
        };

        let outcome = self
            .cache
            .get_or_fetch(key, global.cache_interval_minutes, options.skip_cache, || {
                fetch_latest_release(
                    provider.as_ref(),
                    &repo,
                    &settings,
                    repository.etag.as_deref(),
                )
            })
            .await;

        apply_outcome(&mut enriched, repository, outcome);
        enriched
    }
}

fn apply_outcome(enriched: &mut EnrichedRelease, repository: &Repository, outcome: FetchOutcome) {
    match outcome.result {
        Ok(release) => {
            enriched.release = Some(release);
            enriched.new_etag = outcome.etag;
        }
        Err(FetchError::NotModified) => match &repository.latest_release {
            Some(cached) => {
                enriched.release = Some(cached.to_release());
                enriched.new_etag = outcome.etag;
            }
            None => enriched.error = Some(FetchError::NotModified),
        },
        Err(e) => enriched.error = Some(e),
    }
}

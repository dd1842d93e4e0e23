//! Change detection, notification and repository management.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::checker::ReleaseChecker;
use crate::error::{ReleaseWatchError, Result};
use crate::notify::{NotificationDispatcher, ReleaseNotification};
use crate::repo::{normalize_repository_id, RepoRef};
use crate::settings::{EffectiveSettings, GlobalSettings, RepoOverrides};
use crate::store::{merge_import, RepositoryStore, SettingsStore, Versioned};
use crate::types::{
    AddSummary, CachedRelease, CheckOptions, CheckSummary, EnrichedRelease, ImportSummary,
    Release, Repository,
};

/// Attempts at saving the repository list before a conflict is returned.
const MAX_SAVE_ATTEMPTS: usize = 3;

/// Per-repository changes produced by one check, re-applied by identifier.
#[derive(Debug, Default)]
struct RepoUpdate {
    id: String,
    tag: Option<String>,
    mark_new: bool,
    etag: Option<String>,
    latest_release: Option<CachedRelease>,
    /// ETag and overrides the fetch was made with.
    base_etag: Option<String>,
    base_overrides: Option<RepoOverrides>,
}

impl RepoUpdate {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.etag.is_none() && self.latest_release.is_none()
    }

    /// False once the repository's filter or ETag changed after the fetch.
    fn still_applies(&self, repository: &Repository) -> bool {
        repository.etag == self.base_etag && repository.overrides == self.base_overrides
    }

    fn apply(&self, repository: &mut Repository) {
        if let Some(tag) = &self.tag {
            repository.last_seen_release_tag = Some(tag.clone());
        }
        if self.mark_new {
            repository.is_new = true;
        }
        if let Some(etag) = &self.etag {
            repository.etag = Some(etag.clone());
        }
        if let Some(release) = &self.latest_release {
            repository.latest_release = Some(release.clone());
        }
    }
}

struct PendingNotification {
    repository: Repository,
    release: Release,
    settings: EffectiveSettings,
}

/// Compares each repository's latest release against its last seen tag.
///
/// The first tag seen for a repository is recorded silently. A different tag
/// later on is recorded and announced. The tag is recorded even when every
/// notification channel fails, so a broken channel never causes the same
/// release to be announced again on the next cycle.
fn detect_change(
    repository: &Repository,
    result: &EnrichedRelease,
    mark_new: bool,
) -> (RepoUpdate, Option<PendingNotification>) {
    let mut update = RepoUpdate {
        id: repository.id.clone(),
        base_etag: repository.etag.clone(),
        base_overrides: repository.overrides.clone(),
        ..RepoUpdate::default()
    };

    if let Some(etag) = &result.new_etag {
        if repository.etag.as_ref() != Some(etag) {
            update.etag = Some(etag.clone());
        }
    }

    let Some(release) = &result.release else {
        return (update, None);
    };

    let projection = CachedRelease::from(release);
    let unchanged = repository
        .latest_release
        .as_ref()
        .is_some_and(|cached| cached.same_release(&projection));
    if !unchanged {
        update.latest_release = Some(projection);
    }

    match repository.last_seen_release_tag.as_deref() {
        None => {
            debug!(repo = %repository.id, tag = %release.tag_name, "Recording first seen release");
            update.tag = Some(release.tag_name.clone());
            (update, None)
        }
        Some(seen) if seen == release.tag_name => (update, None),
        Some(seen) => {
            info!(repo = %repository.id, from = %seen, to = %release.tag_name, "New release detected");
            update.tag = Some(release.tag_name.clone());
            update.mark_new = mark_new;
            let pending = PendingNotification {
                repository: repository.clone(),
                release: release.clone(),
                settings: result.settings.clone(),
            };
            (update, Some(pending))
        }
    }
}

/// Runs check cycles and the repository management operations.
pub struct ReleaseWatcher {
    repositories: Arc<dyn RepositoryStore>,
    settings: Arc<dyn SettingsStore>,
    checker: ReleaseChecker,
    dispatcher: NotificationDispatcher,
    /// Serializes check cycles.
    cycle_lock: Mutex<()>,
    /// Serializes writes to the repository list.
    write_lock: Mutex<()>,
}

impl ReleaseWatcher {
    pub fn new(
        repositories: Arc<dyn RepositoryStore>,
        settings: Arc<dyn SettingsStore>,
        checker: ReleaseChecker,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            repositories,
            settings,
            checker,
            dispatcher,
            cycle_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn settings(&self) -> Result<GlobalSettings> {
        self.settings.load_settings().await
    }

    /// Latest matching release of every repository, without changing state.
    pub async fn latest_releases(&self, options: CheckOptions) -> Result<Vec<EnrichedRelease>> {
        let settings = self.settings.load_settings().await?;
        let repositories = self.repositories.load().await?.value;
        Ok(self
            .checker
            .get_latest_releases_for_repos(&repositories, &settings, &settings.locale, options)
            .await)
    }

    /// Runs one check cycle.
    ///
    /// The repository list is saved at most once, and only when a tag, ETag
    /// or stored release changed. Notification failures are logged and do not
    /// fail the cycle; persistence failures do.
    ///
    /// Results fetched under filter settings that changed while the cycle ran
    /// are discarded and picked up again by the next cycle.
    pub async fn check_for_new_releases(&self, options: CheckOptions) -> Result<CheckSummary> {
        let _cycle = self.cycle_lock.lock().await;

        let settings = self.settings.load_settings().await?;
        let loaded = self.repositories.load().await?;
        let results = self
            .checker
            .get_latest_releases_for_repos(&loaded.value, &settings, &settings.locale, options)
            .await;

        let mut updates = Vec::new();
        let mut pending = Vec::new();
        for (repository, result) in loaded.value.iter().zip(&results) {
            if let Some(error) = &result.error {
                debug!(repo = %repository.id, error = %error, "No release for repository");
            }
            let (update, notification) =
                detect_change(repository, result, settings.show_acknowledge);
            if !update.is_empty() {
                updates.push(update);
            }
            pending.extend(notification);
        }

        if !updates.is_empty() {
            let applied = self.persist_updates(loaded, &settings, &updates).await?;
            pending.retain(|item| applied.contains(&item.repository.id));
        }

        let mut notifications_sent = 0;
        for item in &pending {
            let notification = ReleaseNotification::new(
                &item.repository,
                &item.release,
                &item.settings,
                &settings.locale,
            );
            if self.notify(&notification).await {
                notifications_sent += 1;
            }
        }

        info!(checked = results.len(), notifications_sent, "Check cycle finished");
        Ok(CheckSummary {
            notifications_sent,
            checked: results.len(),
        })
    }

    /// Saves cycle results, returning the identifiers that were applied.
    async fn persist_updates(
        &self,
        loaded: Versioned<Vec<Repository>>,
        cycle_settings: &GlobalSettings,
        updates: &[RepoUpdate],
    ) -> Result<HashSet<String>> {
        let _write = self.write_lock.lock().await;

        if self.settings.load_settings().await?.filter_changed(cycle_settings) {
            info!("Filter settings changed during the check, discarding its results");
            return Ok(HashSet::new());
        }

        self.save_with_retry(loaded, |repositories| {
            let mut applied = HashSet::new();
            for update in updates {
                let Some(repository) = repositories.iter_mut().find(|r| r.id == update.id) else {
                    continue;
                };
                if !update.still_applies(repository) {
                    debug!(repo = %update.id, "Repository changed during the check, skipping its result");
                    continue;
                }
                update.apply(repository);
                applied.insert(update.id.clone());
            }
            let changed = !applied.is_empty();
            Ok((applied, changed))
        })
        .await
    }

    /// Returns whether at least one channel delivered.
    async fn notify(&self, notification: &ReleaseNotification) -> bool {
        match self.dispatcher.dispatch(notification).await {
            Ok(delivered) => delivered > 0,
            Err(ReleaseWatchError::Notification { failed_channels }) => {
                warn!(
                    repo = %notification.repo_name,
                    tag = %notification.release.tag_name,
                    failed = ?failed_channels,
                    "Release recorded but not every channel was notified"
                );
                self.dispatcher.configured_channels().len() > failed_channels.len()
            }
            Err(e) => {
                warn!(repo = %notification.repo_name, error = %e, "Notification failed");
                false
            }
        }
    }

    /// Adds repositories by URL or `provider:owner/repo` reference.
    pub async fn add_repositories<S: AsRef<str>>(&self, urls: &[S]) -> Result<AddSummary> {
        self.modify(|repositories| {
            let mut summary = AddSummary::default();
            let mut known: HashSet<String> = repositories.iter().map(|r| r.id.clone()).collect();

            for input in urls {
                let input = input.as_ref().trim();
                match RepoRef::parse(input) {
                    Ok(repo) if known.insert(repo.id()) => {
                        repositories.push(Repository::new(repo.id(), repo.canonical_url()));
                        summary.added += 1;
                    }
                    Ok(_) => summary.skipped += 1,
                    Err(_) => summary.invalid.push(input.to_string()),
                }
            }

            let changed = summary.added > 0;
            Ok((summary, changed))
        })
        .await
    }

    pub async fn remove_repository(&self, id: &str) -> Result<()> {
        let id = normalize_repository_id(id);
        self.modify(|repositories| {
            let before = repositories.len();
            repositories.retain(|r| r.id != id);
            if repositories.len() == before {
                return Err(ReleaseWatchError::UnknownRepository(id.clone()));
            }
            Ok(((), true))
        })
        .await
    }

    /// Clears the unacknowledged flag of one repository.
    pub async fn acknowledge_release(&self, id: &str) -> Result<()> {
        let id = normalize_repository_id(id);
        self.modify(|repositories| {
            let repository = find_mut(repositories, &id)?;
            let changed = repository.is_new;
            repository.is_new = false;
            Ok(((), changed))
        })
        .await
    }

    /// Clears every unacknowledged flag, returning how many were set.
    pub async fn acknowledge_all(&self) -> Result<usize> {
        self.modify(|repositories| {
            let mut cleared = 0;
            for repository in repositories.iter_mut().filter(|r| r.is_new) {
                repository.is_new = false;
                cleared += 1;
            }
            Ok((cleared, cleared > 0))
        })
        .await
    }

    /// Replaces a repository's overrides.
    ///
    /// A change to any filter-affecting field drops the stored ETag, so the
    /// next check cannot be answered with a `304` for the old filter, and
    /// invalidates the release cache.
    pub async fn update_repository_settings(
        &self,
        id: &str,
        overrides: Option<RepoOverrides>,
    ) -> Result<()> {
        let id = normalize_repository_id(id);
        let overrides = overrides.filter(RepoOverrides::is_customized);

        let filter_changed = self
            .modify(|repositories| {
                let repository = find_mut(repositories, &id)?;
                let current = repository.overrides.clone().unwrap_or_default();
                let filter_changed =
                    current.filter_changed(&overrides.clone().unwrap_or_default());
                if filter_changed {
                    repository.etag = None;
                }
                let changed = repository.overrides != overrides;
                repository.overrides = overrides.clone();
                Ok((filter_changed, changed))
            })
            .await?;

        if filter_changed {
            debug!(repo = %id, "Filter settings changed, invalidating release cache");
            self.checker.invalidate_cache();
        }
        Ok(())
    }

    /// Saves global settings. Filter changes clear every stored ETag.
    pub async fn update_settings(&self, settings: &GlobalSettings) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let current = self.settings.load_settings().await?;
        self.settings.save_settings(settings).await?;

        if current.filter_changed(settings) {
            let loaded = self.repositories.load().await?;
            self.save_with_retry(loaded, |repositories| {
                let mut changed = false;
                for repository in repositories.iter_mut() {
                    changed |= repository.etag.take().is_some();
                }
                Ok(((), changed))
            })
            .await?;
            self.checker.invalidate_cache();
            info!("Global filter settings changed, cleared stored ETags");
        }
        Ok(())
    }

    pub async fn export_repositories(&self) -> Result<Vec<Repository>> {
        Ok(self.repositories.load().await?.value)
    }

    /// Merges an exported list by identifier.
    pub async fn import_repositories(&self, imported: Vec<Repository>) -> Result<ImportSummary> {
        self.modify(|repositories| {
            let summary = merge_import(repositories, imported.clone());
            Ok((summary, summary.added + summary.updated > 0))
        })
        .await
    }

    async fn modify<T, F>(&self, f: F) -> Result<T>
    where
        F: FnMut(&mut Vec<Repository>) -> Result<(T, bool)>,
    {
        let _write = self.write_lock.lock().await;
        let loaded = self.repositories.load().await?;
        self.save_with_retry(loaded, f).await
    }

    /// Applies `f` and saves if it reports a change. Expects the write lock held.
    ///
    /// On a version conflict the list is reloaded and `f` applied again.
    async fn save_with_retry<T, F>(&self, mut loaded: Versioned<Vec<Repository>>, mut f: F) -> Result<T>
    where
        F: FnMut(&mut Vec<Repository>) -> Result<(T, bool)>,
    {
        let mut attempt = 1;

        loop {
            let (value, changed) = f(&mut loaded.value)?;
            if !changed {
                return Ok(value);
            }

            match self.repositories.save(&loaded.value, loaded.version).await {
                Ok(version) => {
                    debug!(version, "Saved repository list");
                    return Ok(value);
                }
                Err(ReleaseWatchError::Conflict { expected, found }) if attempt < MAX_SAVE_ATTEMPTS => {
                    warn!(expected, found, attempt, "Repository list changed concurrently, reapplying");
                    attempt += 1;
                    loaded = self.repositories.load().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn find_mut<'a>(repositories: &'a mut [Repository], id: &str) -> Result<&'a mut Repository> {
    repositories
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| ReleaseWatchError::UnknownRepository(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderRegistry;
    use crate::store::MemoryStore;
    use crate::types::FetchError;

    fn release(tag: &str) -> Release {
        Release::synthesized(
            format!("https://github.com/o/r/releases/tag/{tag}"),
            tag.to_string(),
            None,
            None,
        )
    }

    fn enriched(release: Option<Release>, etag: Option<&str>) -> EnrichedRelease {
        EnrichedRelease {
            repo_id: "github:o/r".to_string(),
            release,
            error: None,
            new_etag: etag.map(str::to_string),
            settings: EffectiveSettings::resolve(&GlobalSettings::default(), None),
        }
    }

    fn repository(tag: Option<&str>) -> Repository {
        let mut repository = Repository::new("github:o/r", "https://github.com/o/r");
        repository.last_seen_release_tag = tag.map(str::to_string);
        repository
    }

    #[test]
    fn test_first_seen_records_without_notifying() {
        let (update, pending) = detect_change(&repository(None), &enriched(Some(release("v1")), None), true);

        assert_eq!(update.tag.as_deref(), Some("v1"));
        assert!(!update.mark_new);
        assert!(pending.is_none());
    }

    #[test]
    fn test_same_tag_is_noop() {
        let mut repository = repository(Some("v1"));
        repository.latest_release = Some(CachedRelease::from(&release("v1")));

        let (update, pending) = detect_change(&repository, &enriched(Some(release("v1")), None), true);

        assert!(update.is_empty());
        assert!(pending.is_none());
    }

    #[test]
    fn test_new_tag_notifies_and_marks() {
        let (update, pending) =
            detect_change(&repository(Some("v1")), &enriched(Some(release("v2")), None), true);

        assert_eq!(update.tag.as_deref(), Some("v2"));
        assert!(update.mark_new);
        assert_eq!(pending.unwrap().release.tag_name, "v2");
    }

    #[test]
    fn test_etag_applied_without_release() {
        let mut result = enriched(None, Some("\"e2\""));
        result.error = Some(FetchError::RateLimit);

        let (update, pending) = detect_change(&repository(Some("v1")), &result, true);

        assert_eq!(update.etag.as_deref(), Some("\"e2\""));
        assert!(update.tag.is_none());
        assert!(pending.is_none());
    }

    fn watcher(store: Arc<MemoryStore>) -> ReleaseWatcher {
        ReleaseWatcher::new(
            store.clone(),
            store,
            ReleaseChecker::new(ProviderRegistry::new()),
            NotificationDispatcher::new(),
        )
    }

    #[tokio::test]
    async fn test_add_repositories_summary() {
        let store = Arc::new(MemoryStore::new());
        let watcher = watcher(store.clone());

        let summary = watcher
            .add_repositories(&[
                "https://github.com/Owner/Repo",
                "github:owner/repo",
                "codeberg:forgejo/forgejo",
                "not a repo",
            ])
            .await
            .unwrap();

        assert_eq!(summary.added, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.invalid, vec!["not a repo".to_string()]);
        assert_eq!(store.load().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_unknown_repository_is_error() {
        let watcher = watcher(Arc::new(MemoryStore::new()));

        let Err(ReleaseWatchError::UnknownRepository(id)) = watcher.remove_repository("o/r").await
        else {
            panic!("Expected UnknownRepository error");
        };
        assert_eq!(id, "github:o/r");
    }

    #[tokio::test]
    async fn test_filter_override_change_clears_etag() {
        let mut repository = repository(Some("v1"));
        repository.etag = Some("\"e\"".to_string());
        let store = Arc::new(MemoryStore::with_repositories(vec![repository]));
        let watcher = watcher(store.clone());

        watcher
            .update_repository_settings(
                "github:o/r",
                Some(RepoOverrides {
                    notification_tags: Some("ops".to_string()),
                    ..RepoOverrides::default()
                }),
            )
            .await
            .unwrap();
        assert!(store.load().await.unwrap().value[0].etag.is_some());

        watcher
            .update_repository_settings(
                "github:o/r",
                Some(RepoOverrides {
                    include_regex: Some("^v".to_string()),
                    ..RepoOverrides::default()
                }),
            )
            .await
            .unwrap();
        let stored = &store.load().await.unwrap().value[0];
        assert!(stored.etag.is_none());
        assert_eq!(stored.overrides.as_ref().unwrap().include_regex.as_deref(), Some("^v"));
    }

    #[tokio::test]
    async fn test_acknowledge_all() {
        let mut a = repository(Some("v1"));
        a.is_new = true;
        let store = Arc::new(MemoryStore::with_repositories(vec![a]));
        let watcher = watcher(store.clone());

        assert_eq!(watcher.acknowledge_all().await.unwrap(), 1);
        assert_eq!(watcher.acknowledge_all().await.unwrap(), 0);
        assert!(!store.load().await.unwrap().value[0].is_new);
    }
}

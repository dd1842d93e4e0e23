//! # relwatch
//!
//! Watches GitHub and Codeberg repositories for new releases and announces
//! them by email or push webhook.
//!
//! A check cycle fetches the newest releases of every watched repository,
//! picks the first one that passes the configured filters, compares it with
//! the last seen tag and notifies about changes.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use relwatch::{
//!     http_client, CheckOptions, EnvConfig, JsonFileStore, NotificationDispatcher,
//!     ProviderRegistry, ReleaseChecker, ReleaseWatcher,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EnvConfig::from_env()?;
//!     let client = http_client(config.request_timeout)?;
//!     let store = Arc::new(JsonFileStore::open(&config.data_dir).await?);
//!
//!     let watcher = ReleaseWatcher::new(
//!         store.clone(),
//!         store,
//!         ReleaseChecker::new(ProviderRegistry::from_config(&config, client.clone())?),
//!         NotificationDispatcher::from_config(&config, client),
//!     );
//!
//!     watcher.add_repositories(&["https://github.com/rust-lang/rust"]).await?;
//!
//!     let summary = watcher.check_for_new_releases(CheckOptions::default()).await?;
//!     println!("checked {}, notified {}", summary.checked, summary.notifications_sent);
//!
//!     Ok(())
//! }
//! ```

mod cache;
mod checker;
mod classifier;
mod config;
mod error;
mod fetcher;
mod filter;
pub mod notify;
mod provider;
mod repo;
mod scheduler;
mod settings;
mod store;
mod types;
mod watcher;

pub use cache::{ReleaseCache, ReleaseCacheKey, TtlCache};
pub use checker::ReleaseChecker;
pub use classifier::{
    classify, error_code, ErrorCode, Retryability, TransientErrorClassifier, UNKNOWN_CODE,
};
pub use config::{http_client, EnvConfig, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::{ReleaseWatchError, Result};
pub use fetcher::fetch_latest_release;
pub use filter::{prerelease_keywords, select_release, ReleaseFilter, PRERELEASE_KEYWORDS};
pub use notify::{
    notify_url, EmailChannel, EmailConfig, NotificationChannel, NotificationDispatcher,
    ReleaseNotification, WebhookChannel,
};
pub use provider::{
    CodebergProvider, CommitInfo, FetchResult, GitHubProvider, ProviderRegistry, ReleasePage,
    ReleaseProvider, TagInfo,
};
pub use repo::{normalize_repository_id, ProviderKind, RepoRef};
pub use scheduler::{next_delay, PollTarget, PollingScheduler};
pub use settings::{
    EffectiveSettings, GlobalSettings, NotificationFormat, ReleaseChannel, RepoOverrides,
};
pub use store::{
    merge_import, migrate_repositories, JsonFileStore, MemoryStore, RepositoryStore,
    SettingsStore, Versioned,
};
pub use types::{
    AddSummary, CachedRelease, CheckOptions, CheckSummary, EnrichedRelease, FetchError,
    FetchOutcome, ImportSummary, Release, Repository,
};
pub use watcher::ReleaseWatcher;

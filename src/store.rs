//! Persistence of the repository list and the global settings.
//!
//! The repository list carries a version that every save must name. A save
//! against a stale version fails with [`ReleaseWatchError::Conflict`] so the
//! caller can reload and re-apply its changes.
//!
//! ## File format
//!
//! ```json
//! {
//!   "version": 3,
//!   "repositories": [
//!     { "id": "github:owner/repo", "url": "https://github.com/owner/repo" }
//!   ]
//! }
//! ```
//!
//! A bare JSON array is read as version 0.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{ReleaseWatchError, Result};
use crate::repo::normalize_repository_id;
use crate::settings::GlobalSettings;
use crate::types::{ImportSummary, Repository};

const REPOSITORIES_FILE: &str = "repositories.json";
const SETTINGS_FILE: &str = "settings.json";

/// A value together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Storage for the ordered repository list.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Load the list, with legacy identifiers migrated.
    async fn load(&self) -> Result<Versioned<Vec<Repository>>>;

    /// Replace the list if it is still at `expected_version`.
    ///
    /// Returns the new version.
    async fn save(&self, repositories: &[Repository], expected_version: u64) -> Result<u64>;
}

/// Storage for the global settings document.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load settings merged over the built-in defaults.
    async fn load_settings(&self) -> Result<GlobalSettings>;

    async fn save_settings(&self, settings: &GlobalSettings) -> Result<()>;
}

/// Normalizes identifiers; when two records share an identifier the first wins.
pub fn migrate_repositories(repositories: Vec<Repository>) -> Vec<Repository> {
    let mut seen = HashSet::new();
    let mut migrated = Vec::with_capacity(repositories.len());

    for mut repository in repositories {
        let id = normalize_repository_id(&repository.id);
        if id != repository.id {
            debug!(from = %repository.id, to = %id, "Migrated repository identifier");
        }
        if !seen.insert(id.clone()) {
            warn!(id = %id, "Dropping duplicate repository record");
            continue;
        }
        repository.id = id;
        migrated.push(repository);
    }

    migrated
}

/// Merges an imported list into `existing` by identifier.
///
/// Known repositories take the imported URL and overrides and keep their
/// tracking state; unknown ones are appended.
pub fn merge_import(existing: &mut Vec<Repository>, imported: Vec<Repository>) -> ImportSummary {
    let mut summary = ImportSummary::default();

    for incoming in migrate_repositories(imported) {
        match existing.iter_mut().find(|r| r.id == incoming.id) {
            Some(current) => {
                current.url = incoming.url;
                current.overrides = incoming.overrides;
                if current.last_seen_release_tag.is_none() {
                    current.last_seen_release_tag = incoming.last_seen_release_tag;
                    current.latest_release = incoming.latest_release;
                }
                summary.updated += 1;
            }
            None => {
                existing.push(incoming);
                summary.added += 1;
            }
        }
    }

    summary
}

#[derive(Debug, Default)]
struct MemoryState {
    version: u64,
    repositories: Vec<Repository>,
    settings: GlobalSettings,
}

/// In-memory store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repositories(repositories: Vec<Repository>) -> Self {
        let store = Self::default();
        store.lock().repositories = migrate_repositories(repositories);
        store
    }

    pub fn with_settings(self, settings: GlobalSettings) -> Self {
        self.lock().settings = settings;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RepositoryStore for MemoryStore {
    async fn load(&self) -> Result<Versioned<Vec<Repository>>> {
        let state = self.lock();
        Ok(Versioned {
            version: state.version,
            value: state.repositories.clone(),
        })
    }

    async fn save(&self, repositories: &[Repository], expected_version: u64) -> Result<u64> {
        let mut state = self.lock();
        if state.version != expected_version {
            return Err(ReleaseWatchError::Conflict {
                expected: expected_version,
                found: state.version,
            });
        }
        state.version += 1;
        state.repositories = repositories.to_vec();
        Ok(state.version)
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load_settings(&self) -> Result<GlobalSettings> {
        Ok(self.lock().settings.clone())
    }

    async fn save_settings(&self, settings: &GlobalSettings) -> Result<()> {
        self.lock().settings = settings.clone();
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RepositoryDocument {
    Versioned {
        version: u64,
        repositories: Vec<Repository>,
    },
    Legacy(Vec<Repository>),
}

impl RepositoryDocument {
    fn into_versioned(self) -> Versioned<Vec<Repository>> {
        match self {
            Self::Versioned {
                version,
                repositories,
            } => Versioned {
                version,
                value: repositories,
            },
            Self::Legacy(repositories) => Versioned {
                version: 0,
                value: repositories,
            },
        }
    }
}

/// JSON files in a data directory.
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// crash never leaves a half-written document behind.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Open the store, creating the data directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            ReleaseWatchError::persistence(format!(
                "failed to create data directory {}: {e}",
                dir.display()
            ))
        })?;
        info!(dir = %dir.display(), "Opened JSON store");

        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn repositories_path(&self) -> PathBuf {
        self.dir.join(REPOSITORIES_FILE)
    }

    fn settings_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    async fn read_repositories(&self) -> Result<Versioned<Vec<Repository>>> {
        let path = self.repositories_path();
        let Some(contents) = read_optional(&path).await? else {
            return Ok(Versioned {
                version: 0,
                value: Vec::new(),
            });
        };

        let document: RepositoryDocument = serde_json::from_str(&contents).map_err(|e| {
            ReleaseWatchError::persistence(format!("invalid {}: {e}", path.display()))
        })?;
        let mut versioned = document.into_versioned();
        versioned.value = migrate_repositories(versioned.value);
        Ok(versioned)
    }
}

#[async_trait]
impl RepositoryStore for JsonFileStore {
    async fn load(&self) -> Result<Versioned<Vec<Repository>>> {
        self.read_repositories().await
    }

    async fn save(&self, repositories: &[Repository], expected_version: u64) -> Result<u64> {
        let _guard = self.write_lock.lock().await;

        let found = self.read_repositories().await?.version;
        if found != expected_version {
            return Err(ReleaseWatchError::Conflict {
                expected: expected_version,
                found,
            });
        }

        let version = expected_version + 1;
        let document = RepositoryDocument::Versioned {
            version,
            repositories: repositories.to_vec(),
        };
        write_atomic(&self.repositories_path(), &serde_json::to_vec_pretty(&document)?).await?;
        debug!(version, count = repositories.len(), "Saved repositories");
        Ok(version)
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn load_settings(&self) -> Result<GlobalSettings> {
        let path = self.settings_path();
        match read_optional(&path).await? {
            Some(contents) => serde_json::from_str(&contents).map_err(|e| {
                ReleaseWatchError::persistence(format!("invalid {}: {e}", path.display()))
            }),
            None => Ok(GlobalSettings::default()),
        }
    }

    async fn save_settings(&self, settings: &GlobalSettings) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.settings_path(), &serde_json::to_vec_pretty(settings)?).await
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ReleaseWatchError::persistence(format!(
            "failed to read {}: {e}",
            path.display()
        ))),
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let fail = |e: std::io::Error| {
        ReleaseWatchError::persistence(format!("failed to write {}: {e}", path.display()))
    };

    fs::write(&tmp, contents).await.map_err(fail)?;
    fs::rename(&tmp, path).await.map_err(fail)
}

//! Read-through release cache.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::repo::ProviderKind;
use crate::settings::RepoOverrides;
use crate::types::FetchOutcome;

struct Slot<K, V> {
    key: K,
    value: V,
    expires_at: Instant,
}

/// Map with per-entry expiry.
///
/// Entries live in an arena of slots; a key index and an expiry-ordered set
/// both point into it, so expired entries are purged in deadline order
/// without scanning.
pub struct TtlCache<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    expiry: BTreeSet<(Instant, usize)>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            expiry: BTreeSet::new(),
        }
    }
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the live value for `key`.
    pub fn get(&mut self, key: &K, now: Instant) -> Option<V> {
        self.purge_expired(now);
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref().map(|s| s.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V, ttl: Duration, now: Instant) {
        self.purge_expired(now);
        let expires_at = now + ttl;

        if let Some(&slot) = self.index.get(&key) {
            if let Some(existing) = self.slots[slot].as_mut() {
                self.expiry.remove(&(existing.expires_at, slot));
                existing.value = value;
                existing.expires_at = expires_at;
                self.expiry.insert((expires_at, slot));
                return;
            }
        }

        let entry = Slot {
            key: key.clone(),
            value,
            expires_at,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.expiry.insert((expires_at, slot));
    }

    /// Drops every entry whose deadline is at or before `now`.
    pub fn purge_expired(&mut self, now: Instant) {
        while let Some(&(expires_at, slot)) = self.expiry.first() {
            if expires_at > now {
                break;
            }
            self.expiry.pop_first();
            if let Some(entry) = self.slots[slot].take() {
                self.index.remove(&entry.key);
                self.free.push(slot);
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.expiry.clear();
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Identity of a release request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseCacheKey {
    pub provider: ProviderKind,
    /// Lower-cased `owner/repo`.
    pub repo: String,
    pub locale: String,
    pub overrides: Option<RepoOverrides>,
    pub page_size: u32,
}

/// Memoizes fetch outcomes for the configured cache interval.
#[derive(Default)]
pub struct ReleaseCache {
    entries: Mutex<TtlCache<ReleaseCacheKey, FetchOutcome>>,
    /// Bumped on invalidation; fetches started before it are not stored.
    generation: AtomicU64,
}

impl ReleaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached outcome for `key`, or runs `fetch` and stores it.
    ///
    /// With `interval_minutes <= 0` or `bypass` set, `fetch` always runs and
    /// nothing is stored.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: ReleaseCacheKey,
        interval_minutes: i64,
        bypass: bool,
        fetch: F,
    ) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchOutcome>,
    {
        if interval_minutes <= 0 || bypass {
            return fetch().await;
        }

        if let Some(hit) = self.lock().get(&key, Instant::now()) {
            debug!(repo = %key.repo, "Release cache hit");
            return hit;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let outcome = fetch().await;
        let ttl = Duration::from_secs(interval_minutes as u64 * 60);

        let mut entries = self.lock();
        if self.generation.load(Ordering::SeqCst) == generation {
            entries.insert(key, outcome.clone(), ttl, Instant::now());
        } else {
            debug!(repo = %key.repo, "Cache invalidated during fetch, not storing");
        }
        outcome
    }

    /// Drops every cached release regardless of key.
    pub fn invalidate(&self) {
        let mut entries = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TtlCache<ReleaseCacheKey, FetchOutcome>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

use serde::{Deserialize, Serialize};

use crate::filter::PRERELEASE_KEYWORDS;

/// Release classification bucket a user can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    Stable,
    Prerelease,
    Draft,
}

/// Body format used for webhook notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationFormat {
    Text,
    #[default]
    Markdown,
    Html,
}

impl NotificationFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
        }
    }
}

/// Global settings document.
///
/// Every field has a default, so a partially written or older document is
/// merged over the built-in defaults when it is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Channels that produce notifications.
    pub release_channels: Vec<ReleaseChannel>,
    /// Prerelease keywords allowed when the prerelease channel is enabled.
    /// An empty list admits no keyword prerelease.
    pub prerelease_sub_channels: Vec<String>,
    /// How many releases to inspect per repository.
    pub releases_per_page: u32,
    pub include_regex: Option<String>,
    pub exclude_regex: Option<String>,
    /// Minutes between background check cycles. Values below 1 are clamped to 1.
    pub check_interval_minutes: i64,
    /// Release cache lifetime in minutes. 0 or less disables the cache.
    pub cache_interval_minutes: i64,
    /// Upper bound on concurrent repository fetches.
    pub parallel_repo_fetches: usize,
    /// Flag repositories with a new release until the user acknowledges it.
    pub show_acknowledge: bool,
    pub notification_format: NotificationFormat,
    /// Routing tag(s) passed to the webhook channel.
    pub notification_tags: Option<String>,
    /// Character budget for text and markdown bodies. 0 means unlimited.
    pub notification_max_characters: usize,
    pub locale: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            release_channels: vec![ReleaseChannel::Stable],
            prerelease_sub_channels: PRERELEASE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            releases_per_page: 30,
            include_regex: None,
            exclude_regex: None,
            check_interval_minutes: 60,
            cache_interval_minutes: 5,
            parallel_repo_fetches: 5,
            show_acknowledge: true,
            notification_format: NotificationFormat::Markdown,
            notification_tags: None,
            notification_max_characters: 0,
            locale: "en".to_string(),
        }
    }
}

impl GlobalSettings {
    /// Whether switching from `self` to `other` changes which release a
    /// repository would resolve to.
    pub fn filter_changed(&self, other: &GlobalSettings) -> bool {
        self.release_channels != other.release_channels
            || self.prerelease_sub_channels != other.prerelease_sub_channels
            || self.releases_per_page != other.releases_per_page
            || self.include_regex != other.include_regex
            || self.exclude_regex != other.exclude_regex
    }
}

/// Optional per-repository overrides of [`GlobalSettings`].
///
/// An empty list, a blank string or `None` all mean "inherit the global value".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_channels: Option<Vec<ReleaseChannel>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prerelease_sub_channels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub releases_per_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_regex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_regex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_format: Option<NotificationFormat>,
}

impl RepoOverrides {
    /// Whether any override is effectively set.
    pub fn is_customized(&self) -> bool {
        non_empty_vec(&self.release_channels).is_some()
            || non_empty_vec(&self.prerelease_sub_channels).is_some()
            || self.releases_per_page.is_some_and(|n| n > 0)
            || non_blank(&self.include_regex).is_some()
            || non_blank(&self.exclude_regex).is_some()
            || non_blank(&self.notification_tags).is_some()
            || self.notification_format.is_some()
    }

    /// Whether switching from `self` to `other` affects release selection.
    pub fn filter_changed(&self, other: &RepoOverrides) -> bool {
        self.release_channels != other.release_channels
            || self.prerelease_sub_channels != other.prerelease_sub_channels
            || self.releases_per_page != other.releases_per_page
            || self.include_regex != other.include_regex
            || self.exclude_regex != other.exclude_regex
    }
}

/// Settings in force for one repository during one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveSettings {
    pub release_channels: Vec<ReleaseChannel>,
    pub prerelease_sub_channels: Vec<String>,
    pub releases_per_page: u32,
    pub include_regex: Option<String>,
    pub exclude_regex: Option<String>,
    pub notification_tags: Option<String>,
    pub notification_format: NotificationFormat,
    pub notification_max_characters: usize,
    /// True when at least one repository override is in force.
    pub is_customized: bool,
}

impl EffectiveSettings {
    pub fn resolve(global: &GlobalSettings, overrides: Option<&RepoOverrides>) -> Self {
        let empty = RepoOverrides::default();
        let o = overrides.unwrap_or(&empty);

        Self {
            release_channels: non_empty_vec(&o.release_channels)
                .unwrap_or(&global.release_channels)
                .clone(),
            prerelease_sub_channels: non_empty_vec(&o.prerelease_sub_channels)
                .unwrap_or(&global.prerelease_sub_channels)
                .clone(),
            releases_per_page: o
                .releases_per_page
                .filter(|n| *n > 0)
                .unwrap_or(global.releases_per_page)
                .max(1),
            include_regex: non_blank(&o.include_regex)
                .or_else(|| non_blank(&global.include_regex))
                .map(str::to_string),
            exclude_regex: non_blank(&o.exclude_regex)
                .or_else(|| non_blank(&global.exclude_regex))
                .map(str::to_string),
            notification_tags: non_blank(&o.notification_tags)
                .or_else(|| non_blank(&global.notification_tags))
                .map(str::to_string),
            notification_format: o.notification_format.unwrap_or(global.notification_format),
            notification_max_characters: global.notification_max_characters,
            is_customized: o.is_customized(),
        }
    }

    pub fn allows(&self, channel: ReleaseChannel) -> bool {
        self.release_channels.contains(&channel)
    }
}

fn non_empty_vec<T>(value: &Option<Vec<T>>) -> Option<&Vec<T>> {
    value.as_ref().filter(|v| !v.is_empty())
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

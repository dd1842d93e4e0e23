//! Release selection by channel, prerelease keyword and include/exclude patterns.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::settings::{EffectiveSettings, ReleaseChannel};
use crate::types::{FetchError, Release};

/// Keywords that mark a tag as a prerelease when they follow a `.` or `-`.
pub const PRERELEASE_KEYWORDS: &[&str] = &[
    "alpha",
    "beta",
    "rc",
    "canary",
    "preview",
    "pre",
    "dev",
    "next",
    "nightly",
    "snapshot",
    "unstable",
    "experimental",
    "insiders",
];

fn keyword_regex() -> &'static Regex {
    static KEYWORDS: OnceLock<Regex> = OnceLock::new();
    KEYWORDS.get_or_init(|| {
        // Longest first, so `preview` wins over its prefix `pre`.
        let mut keywords = PRERELEASE_KEYWORDS.to_vec();
        keywords.sort_by_key(|k| std::cmp::Reverse(k.len()));
        let pattern = format!("(?i)[.-]({})", keywords.join("|"));
        Regex::new(&pattern).expect("prerelease keyword pattern is valid")
    })
}

/// Prerelease keywords present in a tag name.
///
/// A keyword only counts when it is preceded by `.` or `-` and is not followed
/// by another ASCII letter, so `-beta2` and `-beta.1` match `beta` but
/// `-betamax` does not.
pub fn prerelease_keywords(tag: &str) -> Vec<&'static str> {
    keyword_regex()
        .captures_iter(tag)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let at_boundary = tag[whole.end()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_ascii_alphabetic());
            if !at_boundary {
                return None;
            }
            let word = caps.get(1)?.as_str();
            PRERELEASE_KEYWORDS
                .iter()
                .copied()
                .find(|k| k.eq_ignore_ascii_case(word))
        })
        .collect()
}

/// Compiled filter for one repository's effective settings.
pub struct ReleaseFilter<'a> {
    settings: &'a EffectiveSettings,
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl<'a> ReleaseFilter<'a> {
    /// Compiles the include and exclude patterns.
    ///
    /// An invalid pattern is logged and that rule is skipped; the remaining
    /// rules still apply.
    pub fn new(settings: &'a EffectiveSettings) -> Self {
        Self {
            settings,
            include: compile("include", settings.include_regex.as_deref()),
            exclude: compile("exclude", settings.exclude_regex.as_deref()),
        }
    }

    pub fn matches(&self, release: &Release) -> bool {
        let tag = release.tag_name.as_str();

        if self.exclude.as_ref().is_some_and(|re| re.is_match(tag)) {
            return false;
        }
        if self.include.as_ref().is_some_and(|re| !re.is_match(tag)) {
            return false;
        }

        if release.draft {
            return self.settings.allows(ReleaseChannel::Draft);
        }

        let keywords = prerelease_keywords(tag);
        if release.prerelease || !keywords.is_empty() {
            return self.settings.allows(ReleaseChannel::Prerelease)
                && self.keywords_allowed(&keywords);
        }

        self.settings.allows(ReleaseChannel::Stable)
    }

    // A prerelease flagged by the forge without any keyword cannot be narrowed
    // further and passes on the channel alone.
    fn keywords_allowed(&self, keywords: &[&str]) -> bool {
        if keywords.is_empty() {
            return true;
        }
        let allowed = &self.settings.prerelease_sub_channels;
        keywords
            .iter()
            .any(|k| allowed.iter().any(|a| a.trim().eq_ignore_ascii_case(k)))
    }
}

fn compile(rule: &str, pattern: Option<&str>) -> Option<Regex> {
    let pattern = pattern?;
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(rule, pattern, error = %e, "Ignoring invalid release filter pattern");
            None
        }
    }
}

/// Returns the first release, newest first, that passes every rule.
pub fn select_release<'r>(
    releases: &'r [Release],
    settings: &EffectiveSettings,
) -> Result<&'r Release, FetchError> {
    let filter = ReleaseFilter::new(settings);
    releases
        .iter()
        .find(|r| filter.matches(r))
        .ok_or(FetchError::NoMatchingReleases)
}

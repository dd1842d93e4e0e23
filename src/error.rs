use thiserror::Error;

/// Errors that can occur when watching repositories.
///
/// Per-repository fetch failures are not represented here; those travel as
/// [`FetchError`](crate::FetchError) inside each check result so that a single
/// repository can never abort a whole check cycle.
#[derive(Error, Debug)]
pub enum ReleaseWatchError {
    /// Error making an HTTP request.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Error parsing or writing JSON.
    #[error("Failed to process JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error (store file operations).
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A repository URL could not be parsed into provider, owner and name.
    #[error("Invalid repository URL: '{0}'")]
    InvalidRepoUrl(String),

    /// Invalid API or webhook base URL.
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// No repository with the given identifier is being watched.
    #[error("Repository not found: {0}")]
    UnknownRepository(String),

    /// The repository or settings document could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Another writer saved the repository document first.
    #[error("Repository document changed concurrently: expected version {expected}, found {found}")]
    Conflict { expected: u64, found: u64 },

    /// One or more notification channels failed.
    #[error("Notification failed for channel(s): {}", failed_channels.join(", "))]
    Notification { failed_channels: Vec<String> },

    /// An email could not be built or submitted.
    #[error("Email error: {0}")]
    Email(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The polling scheduler was started twice.
    #[error("Scheduler is already running")]
    SchedulerRunning,
}

impl ReleaseWatchError {
    pub(crate) fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub(crate) fn email(msg: impl std::fmt::Display) -> Self {
        Self::Email(msg.to_string())
    }
}

/// Result type alias for release watching operations.
pub type Result<T> = std::result::Result<T, ReleaseWatchError>;

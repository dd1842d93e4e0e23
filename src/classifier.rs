//! Decides whether a failed network operation is worth retrying.
//!
//! This is decision support only; callers own any retry policy.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::io;
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::warn;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    Retryable,
    NonRetryable,
}

impl Retryability {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable)
    }
}

/// Transport, timeout and DNS failures.
const RETRYABLE_CODES: &[&str] = &[
    "ECONNRESET",
    "ECONNREFUSED",
    "ECONNABORTED",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
    "ENOTCONN",
    "EHOSTUNREACH",
    "ENETUNREACH",
    "ENETDOWN",
    "EADDRNOTAVAIL",
    "EINTR",
    "EAGAIN",
    "UNEXPECTED_EOF",
    "CONNECT",
    "HTTP_408",
    "HTTP_429",
    "HTTP_500",
    "HTTP_502",
    "HTTP_503",
    "HTTP_504",
];

/// Failures a retry cannot fix.
const NON_RETRYABLE_CODES: &[&str] = &[
    "BUILDER",
    "REDIRECT",
    "DECODE",
    "BODY",
    "INVALID_DATA",
    "INVALID_INPUT",
    "PERMISSION_DENIED",
    "NOT_FOUND",
    "UNSUPPORTED",
];

/// A failure code extracted from an error chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// An operating system error number.
    Errno(i32),
    Named(String),
}

/// Classifies errors and reports each unrecognized code once.
#[derive(Debug, Default)]
pub struct TransientErrorClassifier {
    reported: Mutex<HashSet<String>>,
}

impl TransientErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, err: &(dyn StdError + 'static)) -> Retryability {
        match error_code(err) {
            ErrorCode::Errno(_) => Retryability::Retryable,
            ErrorCode::Named(code) => self.classify_code(&code),
        }
    }

    pub fn classify_code(&self, code: &str) -> Retryability {
        let normalized = code.to_ascii_uppercase();
        if RETRYABLE_CODES.contains(&normalized.as_str()) {
            return Retryability::Retryable;
        }
        if NON_RETRYABLE_CODES.contains(&normalized.as_str()) {
            return Retryability::NonRetryable;
        }

        let first_seen = self
            .reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalized);
        if first_seen {
            warn!(code, "Unrecognized error code, treating it as non-retryable");
        }
        Retryability::NonRetryable
    }

    #[cfg(test)]
    fn reported_count(&self) -> usize {
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Classifies an error with the process-wide classifier.
pub fn classify(err: &(dyn StdError + 'static)) -> Retryability {
    static CLASSIFIER: OnceLock<TransientErrorClassifier> = OnceLock::new();
    CLASSIFIER
        .get_or_init(TransientErrorClassifier::new)
        .classify(err)
}

/// Code of an error that carries none.
pub const UNKNOWN_CODE: &str = "UNKNOWN";

/// Extracts the most specific code from an error and its sources.
///
/// An IO error anywhere in the chain is preferred, since it describes the
/// underlying transport failure; otherwise the HTTP client's own error kind
/// is used, and [`UNKNOWN_CODE`] for anything else.
pub fn error_code(err: &(dyn StdError + 'static)) -> ErrorCode {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return io_error_code(io_err);
        }
        current = e.source();
    }

    if let Some(http_err) = err.downcast_ref::<reqwest::Error>() {
        return ErrorCode::Named(reqwest_error_code(http_err));
    }

    ErrorCode::Named(UNKNOWN_CODE.to_string())
}

fn io_error_code(err: &io::Error) -> ErrorCode {
    if let Some(errno) = err.raw_os_error() {
        return ErrorCode::Errno(errno);
    }
    let code = match err.kind() {
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::ConnectionReset => "ECONNRESET",
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        io::ErrorKind::ConnectionAborted => "ECONNABORTED",
        io::ErrorKind::BrokenPipe => "EPIPE",
        io::ErrorKind::NotConnected => "ENOTCONN",
        io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        io::ErrorKind::Interrupted => "EINTR",
        io::ErrorKind::WouldBlock => "EAGAIN",
        io::ErrorKind::UnexpectedEof => "UNEXPECTED_EOF",
        io::ErrorKind::InvalidData => "INVALID_DATA",
        io::ErrorKind::InvalidInput => "INVALID_INPUT",
        io::ErrorKind::PermissionDenied => "PERMISSION_DENIED",
        io::ErrorKind::NotFound => "NOT_FOUND",
        io::ErrorKind::Unsupported => "UNSUPPORTED",
        other => return ErrorCode::Named(format!("IO_{other:?}").to_ascii_uppercase()),
    };
    ErrorCode::Named(code.to_string())
}

fn reqwest_error_code(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "ETIMEDOUT".to_string()
    } else if err.is_connect() {
        "CONNECT".to_string()
    } else if let Some(status) = err.status() {
        format!("HTTP_{}", status.as_u16())
    } else if err.is_builder() {
        "BUILDER".to_string()
    } else if err.is_redirect() {
        "REDIRECT".to_string()
    } else if err.is_decode() {
        "DECODE".to_string()
    } else if err.is_body() {
        "BODY".to_string()
    } else {
        "REQUEST".to_string()
    }
}

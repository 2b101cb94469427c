//! Error types for ModelKeeper.
//!
//! Transfer and serving-process failures carry an [`ErrorCategory`] that is
//! attached where the failure originates (HTTP status, transport error kind,
//! I/O error kind, process exit, server-sent error object). Retry decisions
//! only ever look at the category.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Classification of a transfer or serving-process failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Generic network failure (DNS, refused connection, broken stream).
    Network,
    /// The request or stream exceeded its time budget.
    Timeout,
    /// The peer reset or closed the connection mid-transfer.
    ConnectionReset,
    /// The remote side answered with a 5xx or is temporarily overloaded.
    ServerUnavailable,
    /// The artifact does not exist upstream.
    NotFound,
    /// Credentials missing or rejected.
    Unauthorized,
    /// The request was malformed (bad name, bad tag, rejected manifest).
    Invalid,
    /// No space left on the local device.
    DiskFull,
    /// Local I/O failure other than a full disk.
    Io,
    /// Anything that could not be classified.
    Other,
}

impl ErrorCategory {
    /// Whether an error of this category is worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::ConnectionReset
                | ErrorCategory::ServerUnavailable
        )
    }

    /// Map an HTTP status code to a category.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorCategory::Unauthorized,
            404 | 410 => ErrorCategory::NotFound,
            408 => ErrorCategory::Timeout,
            507 => ErrorCategory::DiskFull,
            429 | 500..=599 => ErrorCategory::ServerUnavailable,
            400..=499 => ErrorCategory::Invalid,
            _ => ErrorCategory::Other,
        }
    }

    /// Map a local I/O error kind to a category.
    pub fn from_io_kind(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind;
        match kind {
            ErrorKind::StorageFull => ErrorCategory::DiskFull,
            ErrorKind::TimedOut => ErrorCategory::Timeout,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                ErrorCategory::ConnectionReset
            }
            ErrorKind::ConnectionRefused | ErrorKind::NotConnected => ErrorCategory::Network,
            ErrorKind::UnexpectedEof => ErrorCategory::ConnectionReset,
            _ => ErrorCategory::Io,
        }
    }

    /// Classify an error object emitted by the serving process.
    ///
    /// The pull stream and the CLI only expose free text, so this is the one
    /// place where text is turned into a category. Everything downstream
    /// works on the category.
    pub fn from_server_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["no space left", "disk full", "not enough space"]) {
            ErrorCategory::DiskFull
        } else if has(&["file does not exist", "not found", "manifest unknown"]) {
            ErrorCategory::NotFound
        } else if has(&["unauthorized", "forbidden", "permission denied"]) {
            ErrorCategory::Unauthorized
        } else if has(&["invalid", "malformed", "unsupported"]) {
            ErrorCategory::Invalid
        } else if has(&["timeout", "timed out", "deadline exceeded"]) {
            ErrorCategory::Timeout
        } else if has(&["connection reset", "unexpected eof", "broken pipe"]) {
            ErrorCategory::ConnectionReset
        } else if has(&["connection refused", "no such host", "network", "dial tcp", "tls"]) {
            ErrorCategory::Network
        } else if has(&["service unavailable", "bad gateway", "too many requests"]) {
            ErrorCategory::ServerUnavailable
        } else {
            ErrorCategory::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ConnectionReset => "connection_reset",
            ErrorCategory::ServerUnavailable => "server_unavailable",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Unauthorized => "unauthorized",
            ErrorCategory::Invalid => "invalid",
            ErrorCategory::DiskFull => "disk_full",
            ErrorCategory::Io => "io",
            ErrorCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for ModelKeeper.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// A transfer for `name` failed.
    #[error("Transfer of {name} failed ({category}): {message}")]
    Transfer {
        name: String,
        category: ErrorCategory,
        message: String,
    },

    /// Talking to the serving process failed outside of a transfer.
    #[error("Serving process error ({category}): {message}")]
    Serving {
        category: ErrorCategory,
        message: String,
    },

    #[error("A transfer for {name} is already in progress")]
    AlreadyInProgress { name: String },

    #[error("No active transfer for {name}")]
    NotFound { name: String },

    #[error("Transfer of {name} was cancelled")]
    Cancelled { name: String },

    #[error("Giving up on {name} after {attempts} attempts: {last}")]
    RetriesExhausted {
        name: String,
        attempts: u32,
        #[source]
        last: Box<KeeperError>,
    },

    #[error("Invalid model name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for ModelKeeper operations.
pub type Result<T> = std::result::Result<T, KeeperError>;

impl From<std::io::Error> for KeeperError {
    fn from(err: std::io::Error) -> Self {
        KeeperError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(err: serde_json::Error) -> Self {
        KeeperError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for KeeperError {
    fn from(err: reqwest::Error) -> Self {
        KeeperError::Serving {
            category: category_of_reqwest(&err),
            message: err.to_string(),
        }
    }
}

/// Derive a category from a `reqwest` error.
pub(crate) fn category_of_reqwest(err: &reqwest::Error) -> ErrorCategory {
    if err.is_timeout() {
        ErrorCategory::Timeout
    } else if let Some(status) = err.status() {
        ErrorCategory::from_status(status.as_u16())
    } else if err.is_connect() {
        ErrorCategory::Network
    } else if err.is_body() || err.is_decode() {
        ErrorCategory::ConnectionReset
    } else if err.is_request() {
        ErrorCategory::Network
    } else {
        ErrorCategory::Other
    }
}

impl KeeperError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        KeeperError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Build a transfer error for `name`.
    pub fn transfer(
        name: impl Into<String>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        KeeperError::Transfer {
            name: name.into(),
            category,
            message: message.into(),
        }
    }

    /// The failure category, when this error has one.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            KeeperError::Transfer { category, .. } | KeeperError::Serving { category, .. } => {
                Some(*category)
            }
            KeeperError::Io { source, .. } => Some(
                source
                    .as_ref()
                    .map(|e| ErrorCategory::from_io_kind(e.kind()))
                    .unwrap_or(ErrorCategory::Io),
            ),
            KeeperError::RetriesExhausted { last, .. } => last.category(),
            _ => None,
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Cancellation, concurrency conflicts and local bookkeeping errors are
    /// never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            KeeperError::RetriesExhausted { .. } => false,
            _ => self.category().is_some_and(ErrorCategory::is_retryable),
        }
    }

    /// Whether this error is a user cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, KeeperError::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KeeperError::AlreadyInProgress {
            name: "llama3:latest".into(),
        };
        assert_eq!(
            err.to_string(),
            "A transfer for llama3:latest is already in progress"
        );
    }

    #[test]
    fn test_retryable_partition() {
        for category in [
            ErrorCategory::Network,
            ErrorCategory::Timeout,
            ErrorCategory::ConnectionReset,
            ErrorCategory::ServerUnavailable,
        ] {
            assert!(category.is_retryable(), "{category} should retry");
        }
        for category in [
            ErrorCategory::NotFound,
            ErrorCategory::Unauthorized,
            ErrorCategory::Invalid,
            ErrorCategory::DiskFull,
            ErrorCategory::Io,
            ErrorCategory::Other,
        ] {
            assert!(!category.is_retryable(), "{category} should be fatal");
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCategory::from_status(404), ErrorCategory::NotFound);
        assert_eq!(ErrorCategory::from_status(401), ErrorCategory::Unauthorized);
        assert_eq!(ErrorCategory::from_status(400), ErrorCategory::Invalid);
        assert_eq!(
            ErrorCategory::from_status(503),
            ErrorCategory::ServerUnavailable
        );
        assert_eq!(ErrorCategory::from_status(507), ErrorCategory::DiskFull);
    }

    #[test]
    fn test_server_message_mapping() {
        assert_eq!(
            ErrorCategory::from_server_message("pull model manifest: file does not exist"),
            ErrorCategory::NotFound
        );
        assert_eq!(
            ErrorCategory::from_server_message("write /models/blobs: no space left on device"),
            ErrorCategory::DiskFull
        );
        assert_eq!(
            ErrorCategory::from_server_message("read tcp: connection reset by peer"),
            ErrorCategory::ConnectionReset
        );
        assert_eq!(
            ErrorCategory::from_server_message("something odd"),
            ErrorCategory::Other
        );
    }

    #[test]
    fn test_cancel_and_conflict_not_retryable() {
        assert!(!KeeperError::Cancelled { name: "a".into() }.is_retryable());
        assert!(!KeeperError::AlreadyInProgress { name: "a".into() }.is_retryable());
        assert!(KeeperError::transfer("a", ErrorCategory::Timeout, "slow").is_retryable());
    }

    #[test]
    fn test_io_disk_full_is_fatal() {
        let err = KeeperError::io_with_path(
            std::io::Error::new(std::io::ErrorKind::StorageFull, "full"),
            "/tmp/x",
        );
        assert_eq!(err.category(), Some(ErrorCategory::DiskFull));
        assert!(!err.is_retryable());
    }
}

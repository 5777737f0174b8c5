//! Error types for objarchive
//!
//! Backend failures are reported as [`StorageError`] values carrying a
//! [`StorageErrorKind`]; the kind decides whether the retry policy tries
//! again. Everything the engine surfaces to callers is an [`ArchiveError`].

use crate::storage::StorageOp;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Whether a failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Likely to succeed if attempted again (throttling, 5xx, network)
    Transient,
    /// Will fail again no matter how often it is attempted
    Permanent,
}

/// Backend failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    /// The backend asked us to slow down (HTTP 429)
    RateLimited,
    /// Server-side failure (HTTP 5xx)
    ServerError,
    /// Connection reset, DNS failure, dispatch failure
    Network,
    /// The request did not complete in time
    Timeout,
    /// Object or bucket does not exist
    NotFound,
    /// Credentials lack access
    PermissionDenied,
    /// The backend rejected the request as malformed
    InvalidRequest,
    /// Anything the backend could not categorize
    Other,
}

impl StorageErrorKind {
    /// Classify this kind for the retry policy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited | Self::ServerError | Self::Network | Self::Timeout => {
                ErrorClass::Transient
            }
            Self::NotFound | Self::PermissionDenied | Self::InvalidRequest | Self::Other => {
                ErrorClass::Permanent
            }
        }
    }

    /// Map an HTTP status code to a kind
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            404 => Self::NotFound,
            401 | 403 => Self::PermissionDenied,
            408 => Self::Timeout,
            400 | 405 | 409 | 411 | 412 | 413 | 416 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Other,
        }
    }

    /// Short stable name used in logs and summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate-limited",
            Self::ServerError => "server-error",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::NotFound => "not-found",
            Self::PermissionDenied => "permission-denied",
            Self::InvalidRequest => "invalid-request",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StorageError {
    /// Failure category
    pub kind: StorageErrorKind,
    /// Backend-provided detail
    pub message: String,
}

impl StorageError {
    /// Create a storage error
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::NotFound, message)
    }

    /// Retry classification of this error
    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    /// Check if this error is worth retrying
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err.kind() {
            ErrorKind::NotFound => StorageErrorKind::NotFound,
            ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            ErrorKind::TimedOut => StorageErrorKind::Timeout,
            ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => StorageErrorKind::Network,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => StorageErrorKind::InvalidRequest,
            _ => StorageErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

/// Why a copied object failed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    /// The destination object does not exist after a reported-successful copy
    Missing,
    /// Destination size differs from the listed source size
    SizeMismatch {
        /// Size recorded by the lister
        expected: u64,
        /// Size reported by the destination
        actual: u64,
    },
    /// Both sides carry checksums and they differ
    ChecksumMismatch {
        /// Source checksum
        expected: String,
        /// Destination checksum
        actual: String,
    },
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "destination object missing after copy"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {} bytes, got {}", expected, actual)
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {}, got {}", expected, actual)
            }
        }
    }
}

/// Main error type for archive runs
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Enumerating the source bucket failed; the run is aborted
    #[error("Listing of bucket '{bucket}' failed after {attempts} attempt(s): {source}")]
    Listing {
        bucket: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    /// A transient failure persisted through every retry
    #[error("{operation} of '{key}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: StorageOp,
        key: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    /// A permanent failure; not retried
    #[error("{operation} of '{key}' failed permanently: {source}")]
    Permanent {
        operation: StorageOp,
        key: String,
        #[source]
        source: StorageError,
    },

    /// The destination did not match the source after copy
    #[error("Verification failed for '{key}': {reason}")]
    Verification {
        key: String,
        reason: VerificationFailure,
    },

    /// Job status moved backwards or skipped a required step
    #[error("Invalid state transition for '{key}': {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: &'static str,
        to: &'static str,
    },

    /// A worker task panicked
    #[error("Worker for '{key}' panicked: {message}")]
    WorkerPanic { key: String, message: String },

    /// Trigger payload could not be parsed or validated
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Engine configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error outside of a backend call
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a payload validation error
    pub fn payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    /// Create a verification error
    pub fn verification(key: impl Into<String>, reason: VerificationFailure) -> Self {
        Self::Verification {
            key: key.into(),
            reason,
        }
    }

    /// Classification of the backend failure behind this error, if any
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Listing { source, .. }
            | Self::RetriesExhausted { source, .. }
            | Self::Permanent { source, .. } => Some(source.class()),
            _ => None,
        }
    }

    /// Check if this error aborts the whole run
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::Listing { .. } | Self::InvalidPayload(_) | Self::ConfigError(_) | Self::Io { .. }
        )
    }

    /// Short category label used in summaries
    pub fn category(&self) -> &'static str {
        match self {
            Self::Listing { .. } => "listing",
            Self::RetriesExhausted { .. } => "transient",
            Self::Permanent { .. } => "permanent",
            Self::Verification { .. } => "verification",
            Self::InvalidTransition { .. } => "internal",
            Self::WorkerPanic { .. } => "panic",
            Self::InvalidPayload(_) => "payload",
            Self::ConfigError(_) => "config",
            Self::Io { .. } => "io",
        }
    }

    /// HTTP status an entry point should answer with when a run ends in this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidPayload(_) | Self::ConfigError(_) => 400,
            _ => 500,
        }
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Listing { .. } => 2,
            _ => 1,
        }
    }
}

/// Result type alias for objarchive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::InvalidPayload(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| ArchiveError::io(path, e))
    }
}

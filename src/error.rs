//! Error types for the retrieval core
//!
//! Four kinds of failure reach callers: invalid construction parameters,
//! index failures, admission rejections and broken streams. Each has its own
//! enum so callers can match on exactly what they handle, and [`Error`]
//! wraps all of them for code that just wants to propagate.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid construction parameters. Fatal, never retried.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error(
        "Unknown shard kind '{value}'\nSuggestion: Use one of: exhaustive, flat, partitioned, ivf"
    )]
    UnknownShardKind { value: String },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Failed to load settings: {0}")]
    Settings(#[from] Box<figment::Error>),
}

impl ConfigurationError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub fn status_code(&self) -> &'static str {
        match self {
            Self::UnknownShardKind { .. } => "UNKNOWN_SHARD_KIND",
            Self::InvalidDimension { .. } => "INVALID_DIMENSION",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::Settings(_) => "SETTINGS_ERROR",
        }
    }
}

/// Failures of the vector index: bad input, corrupt persisted state or a
/// shard backend that could not complete an operation.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Got {ids} ids for {vectors} vectors\nSuggestion: Supply exactly one id per vector or none at all")]
    IdCountMismatch { vectors: usize, ids: usize },

    #[error("Shard {shard} failed: {reason}")]
    Backend { shard: usize, reason: String },

    #[error(
        "Index configuration not found at '{path}'\nSuggestion: Check that the directory was written by save()"
    )]
    MissingConfig { path: PathBuf },

    #[error(
        "Shard file {shard} not found at '{path}'\nSuggestion: The index directory is incomplete, rebuild and save it again"
    )]
    MissingShard { shard: usize, path: PathBuf },

    #[error(
        "Index data at '{path}' is corrupted: {reason}\nSuggestion: Rebuild the index from source vectors"
    )]
    Corrupted { path: PathBuf, reason: String },

    #[error("I/O error on '{path}': {source}\nSuggestion: Check disk space and file permissions")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn status_code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::IdCountMismatch { .. } => "ID_COUNT_MISMATCH",
            Self::Backend { .. } => "SHARD_BACKEND_ERROR",
            Self::MissingConfig { .. } => "MISSING_CONFIG",
            Self::MissingShard { .. } => "MISSING_SHARD",
            Self::Corrupted { .. } => "INDEX_CORRUPTED",
            Self::Io { .. } => "IO_ERROR",
            Self::Configuration(e) => e.status_code(),
        }
    }
}

/// Admission was refused because the required delay exceeds the component's
/// `max_delay_seconds`. The caller decides whether and when to retry.
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "Rate limit exceeded for '{component}': required delay {required_delay:?} exceeds maximum {max_delay:?}\nSuggestion: Back off before retrying"
)]
pub struct RateLimitExceeded {
    pub component: String,
    pub required_delay: Duration,
    pub max_delay: Duration,
}

impl RateLimitExceeded {
    pub fn status_code(&self) -> &'static str {
        "RATE_LIMIT_EXCEEDED"
    }
}

/// Stream buffer failures. A stream that reports one of these is broken
/// and gets closed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Stream {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Stream buffer is closed")]
    Closed,
}

impl StreamError {
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "STREAM_TIMEOUT",
            Self::Closed => "STREAM_CLOSED",
        }
    }
}

/// Failure reported by an [`Encoder`](crate::encoder::Encoder).
#[derive(Error, Debug)]
#[error("Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized")]
pub struct EncodeError(pub String);

/// Crate-level error wrapping every failure kind.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl Error {
    /// True when admission control refused the call. Distinguishes a
    /// rejection from every other failure so callers can apply backoff.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    pub fn status_code(&self) -> &'static str {
        match self {
            Self::Configuration(e) => e.status_code(),
            Self::Index(e) => e.status_code(),
            Self::RateLimited(e) => e.status_code(),
            Self::Stream(e) => e.status_code(),
            Self::Encode(_) => "ENCODE_ERROR",
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Configuration(_) => vec![
                "Check .docqa/settings.toml and DOCQA_* environment variables",
                "Run 'docqa config' to see the effective settings",
            ],
            Self::Index(IndexError::Corrupted { .. } | IndexError::MissingShard { .. }) => vec![
                "Re-ingest the source documents and save the index again",
                "Check for disk errors or partially copied index directories",
            ],
            Self::Index(IndexError::DimensionMismatch { .. }) => vec![
                "Make sure the encoder dimension matches index.dimension",
            ],
            Self::RateLimited(_) => vec![
                "Wait before retrying, the component is saturated",
                "Raise burst_size or max_delay_seconds if the load is expected",
            ],
            Self::Stream(StreamError::Timeout { .. }) => vec![
                "The consumer stopped reading or the producer stalled",
                "Increase streaming.chunk_timeout_seconds for slow consumers",
            ],
            _ => vec![],
        }
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// Result type alias for stream operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Result type alias for crate operations
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the exam generation pipeline.
//!
//! Store and provider failures are typed where they happen. The orchestrator folds
//! everything into [`GenerationError`], the only error a caller ever sees from a job.

use crate::artifact::PendingArtifact;
use crate::types::{ArtifactId, UserId};
use std::time::Duration;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Artifact limit reached: {limit} artifacts already saved")]
    LimitReached { limit: usize },

    #[error("Artifact {artifact_id} is not owned by {user_id}")]
    NotOwner {
        artifact_id: ArtifactId,
        user_id: UserId,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Failure subtype reported by the external generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    RateLimited,
    InvalidCredential,
    QuotaExceededUpstream,
    PayloadTooLarge,
    SafetyBlocked(String),
    Unknown,
}

impl UpstreamErrorKind {
    /// Classify an HTTP status returned by the service.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => UpstreamErrorKind::InvalidCredential,
            402 => UpstreamErrorKind::QuotaExceededUpstream,
            413 => UpstreamErrorKind::PayloadTooLarge,
            429 => UpstreamErrorKind::RateLimited,
            451 => UpstreamErrorKind::SafetyBlocked("blocked by provider policy".to_string()),
            _ => UpstreamErrorKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamErrorKind::RateLimited => "rate_limited",
            UpstreamErrorKind::InvalidCredential => "invalid_credential",
            UpstreamErrorKind::QuotaExceededUpstream => "quota_exceeded_upstream",
            UpstreamErrorKind::PayloadTooLarge => "payload_too_large",
            UpstreamErrorKind::SafetyBlocked(_) => "safety_blocked",
            UpstreamErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamErrorKind::SafetyBlocked(reason) => write!(f, "safety_blocked ({})", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Errors raised by a generation service implementation
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider rejected request ({kind}): {message}")]
    Upstream {
        kind: UpstreamErrorKind,
        message: String,
    },

    #[error("Provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn upstream(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        ProviderError::Upstream {
            kind,
            message: message.into(),
        }
    }
}

/// Admission controller errors
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("No admission slot became free within {waited:?} (capacity {capacity})")]
    Timeout { waited: Duration, capacity: usize },

    #[error("Lease store error: {0}")]
    Store(#[from] StorageError),
}

/// Reasons a job is rejected before anything leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("job name is blank")]
    MissingName,

    #[error("no uploaded documents are ready")]
    NoReadyDocuments,

    #[error("item count must be between 1 and {max}, got {requested}")]
    InvalidItemCount { requested: u32, max: u32 },
}

/// Capacity failures. Both are retryable by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("upload slots exhausted: {remaining} of {max_files} slots free")]
    UploadSlots { max_files: usize, remaining: usize },

    #[error("admission timed out after {waited:?}")]
    AdmissionTimeout { waited: Duration },
}

/// The fixed error taxonomy surfaced at the job boundary
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("Capacity unavailable: {0}")]
    Capacity(#[from] CapacityError),

    #[error("No generation credits left for {user_id}")]
    QuotaExhausted { user_id: UserId },

    #[error("Generation service error ({kind}): {message}")]
    Upstream {
        kind: UpstreamErrorKind,
        message: String,
    },

    #[error("Generation service returned no usable text")]
    EmptyResponse,

    #[error("Generated exam could not be saved: {source}. Retry the save; do not regenerate")]
    Persistence {
        pending: Box<PendingArtifact>,
        #[source]
        source: StorageError,
    },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Backing store unavailable: {0}")]
    Unavailable(String),
}

impl GenerationError {
    /// Machine-readable code for the error kind
    pub fn error_code(&self) -> &'static str {
        match self {
            GenerationError::Validation(_) => "VALIDATION_ERROR",
            GenerationError::Capacity(_) => "CAPACITY_ERROR",
            GenerationError::QuotaExhausted { .. } => "QUOTA_EXHAUSTED",
            GenerationError::Upstream { .. } => "UPSTREAM_ERROR",
            GenerationError::EmptyResponse => "EMPTY_RESPONSE",
            GenerationError::Persistence { .. } => "PERSISTENCE_ERROR",
            GenerationError::Cancelled => "CANCELLED",
            GenerationError::Unavailable(_) => "UNAVAILABLE",
        }
    }

    /// Whether the caller may simply try the same job again.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Capacity(_) | GenerationError::Unavailable(_) => true,
            GenerationError::Upstream { kind, .. } => {
                matches!(kind, UpstreamErrorKind::RateLimited | UpstreamErrorKind::Unknown)
            }
            GenerationError::EmptyResponse => true,
            GenerationError::Cancelled => true,
            // The output exists; only the save step should be retried.
            GenerationError::Persistence { .. } => false,
            GenerationError::Validation(_) | GenerationError::QuotaExhausted { .. } => false,
        }
    }

    /// Output that was produced but not saved, if any.
    pub fn pending_artifact(&self) -> Option<&PendingArtifact> {
        match self {
            GenerationError::Persistence { pending, .. } => Some(pending.as_ref()),
            _ => None,
        }
    }
}

impl From<ProviderError> for GenerationError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Upstream { kind, message } => GenerationError::Upstream { kind, message },
            ProviderError::Transport(message) => GenerationError::Upstream {
                kind: UpstreamErrorKind::Unknown,
                message,
            },
            ProviderError::UnsupportedFormat(message) | ProviderError::Config(message) => {
                GenerationError::Upstream {
                    kind: UpstreamErrorKind::Unknown,
                    message,
                }
            }
        }
    }
}

impl From<AdmissionError> for GenerationError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Timeout { waited, .. } => {
                GenerationError::Capacity(CapacityError::AdmissionTimeout { waited })
            }
            AdmissionError::Store(e) => GenerationError::Unavailable(e.to_string()),
        }
    }
}

/// Errors from configuration, logging setup and the composition root
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    #[error("Generation failed: {0}")]
    GenerationFailed(#[from] GenerationError),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

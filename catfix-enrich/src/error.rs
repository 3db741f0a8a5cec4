//! Error types for catfix-enrich
//!
//! Three layers:
//! - [`ServiceError`]: one failed call to an external service
//! - [`RetryError`]: a call site gave up after retries (or was cancelled)
//! - [`EnrichError`]: anything escaping a pipeline stage or the import plumbing
//! - [`RecordFailure`]: an [`EnrichError`] plus the record as far as it got
//!
//! Every error exposes a stable `kind()` name; the name is what ends up in
//! `tag:ErrorKind:attemptN` annotations and `row_failed:<ErrorKind>` reasons.

use crate::types::Record;
use thiserror::Error;

/// Failure of a single external service call
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Request did not complete within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established or was dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// Service answered with a non-success status on a path that requires success
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Failure injected by a mock service
    #[error("Simulated failure: {0}")]
    Simulated(String),
}

impl ServiceError {
    /// Stable kind name used in error tags
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Timeout(_) => "Timeout",
            ServiceError::Connection(_) => "ConnectionError",
            ServiceError::Status { .. } => "HttpStatus",
            ServiceError::Decode(_) => "DecodeError",
            ServiceError::Simulated(_) => "SimulatedError",
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout(err.to_string())
        } else if err.is_decode() {
            ServiceError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ServiceError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            ServiceError::Connection(err.to_string())
        }
    }
}

/// A retried call site gave up
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    #[error("Retry exhausted for {tag} after {attempts} attempts: {last_error}")]
    Exhausted {
        tag: String,
        attempts: u32,
        last_error: ServiceError,
    },

    #[error("Cancelled {tag} after {attempts} attempts")]
    Cancelled { tag: String, attempts: u32 },
}

impl RetryError {
    pub fn kind(&self) -> &'static str {
        match self {
            RetryError::Exhausted { .. } => "RetryExhausted",
            RetryError::Cancelled { .. } => "Cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Errors escaping the enrichment pipeline or the import plumbing
#[derive(Debug, Error)]
pub enum EnrichError {
    /// Bad input resolved before the pipeline runs
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// catfix-common error
    #[error("Common error: {0}")]
    Common(#[from] catfix_common::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EnrichError {
    /// Stable kind name used in `row_failed:<kind>` reasons
    pub fn kind(&self) -> &'static str {
        match self {
            EnrichError::Validation(_) => "ValidationError",
            EnrichError::Service(err) => err.kind(),
            EnrichError::Retry(err) => err.kind(),
            EnrichError::Csv(_) => "CsvError",
            EnrichError::Json(_) => "JsonError",
            EnrichError::Io(_) => "IoError",
            EnrichError::Common(_) => "CommonError",
            EnrichError::Other(_) => "UnexpectedError",
        }
    }
}

/// A record that stopped before reaching a decision
///
/// `record` keeps every annotation added up to the failure point.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RecordFailure {
    pub record: Box<Record>,
    #[source]
    pub error: EnrichError,
}

impl RecordFailure {
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

/// Result type for catfix-enrich operations
pub type EnrichResult<T> = Result<T, EnrichError>;

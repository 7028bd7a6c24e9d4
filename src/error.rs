//! Typed errors for the pipeline boundaries (network, object storage, parsing).
//!
//! Batch-level code works in `anyhow::Result`; these enums exist where a caller
//! needs to branch on *which* failure happened.
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request cannot be cloned for retry: {0}")]
    InvalidRequest(String),
    #[error("http status {status} from {url}")]
    Status { status: StatusCode, url: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The response headers arrived but the body did not.
    #[error("body read failed for {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => crate::fetch::is_transient_status(*status),
            FetchError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Body { .. } => true,
            FetchError::InvalidRequest(_) | FetchError::RetriesExhausted { .. } => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Why raw content was inlined into the database instead of object storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackReason {
    #[error("object storage disabled")]
    Disabled,
    #[error("object storage write failed: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
    #[error("unsupported or foreign storage url: {0}")]
    InvalidUrl(String),
    #[error("object storage not configured")]
    Unconfigured,
    #[error("storage directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no parser registered for source {0}")]
    UnknownSource(String),
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

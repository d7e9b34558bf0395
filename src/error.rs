use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::retry::is_retryable_http_error;

/// Content inside the assembly buffer could not become a frame.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("malformed frame ({len} bytes): {reason}")]
    Malformed { len: usize, reason: String },
    #[error("discarded {len} stray bytes before frame")]
    Noise { len: usize },
    #[error("assembly buffer exceeded {limit} bytes")]
    Overflow { limit: usize },
}

/// Decoded payload does not have the `[{data1, data2}, ...]` shape.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("payload is not a sequence")]
    NotASequence { payload: Value },
    #[error("payload sequence is empty")]
    Empty,
    #[error("first sample is invalid: {reason}")]
    InvalidSample { payload: Value, reason: String },
}

impl ValidationError {
    /// The offending payload, kept for logging.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            ValidationError::NotASequence { payload }
            | ValidationError::InvalidSample { payload, .. } => Some(payload),
            ValidationError::Empty => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("store backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("store task failed: {0}")]
    Task(String),
    #[error("stored timestamp {0} is out of range")]
    BadTimestamp(i64),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("rejected: {0}")]
    Validation(#[from] ValidationError),
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
    #[error("upstream gateway failed (status {status:?}): {message}")]
    Upstream { status: Option<u16>, message: String },
}

impl IngestError {
    /// Transient failures worth another attempt. Rejections never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Validation(_) => false,
            IngestError::Store(_) => true,
            IngestError::Upstream { status: None, .. } => true,
            IngestError::Upstream { status: Some(code), .. } => is_retryable_http_error(*code),
        }
    }

    pub fn is_rejection(&self) -> bool {
        match self {
            IngestError::Validation(_) => true,
            IngestError::Upstream { status: Some(code), .. } => (400..500).contains(code) && !is_retryable_http_error(*code),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("reading series failed: {0}")]
    Store(#[from] StoreError),
    #[error("chart renderer failed: {0}")]
    Renderer(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid transport target `{0}`")]
    InvalidTarget(String),
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stream read failed: {0}")]
    Read(#[from] std::io::Error),
}

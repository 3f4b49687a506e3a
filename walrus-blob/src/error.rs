use thiserror::Error;

use crate::{BlobId, ByteRange};

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during blob operations.
///
/// Cloneable so a single fetch outcome can be handed to every caller
/// waiting on the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("Failed to fetch blob {blob_id}{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    FetchFailed {
        blob_id: BlobId,
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid range {range} for item {path} in blob {blob_id} ({blob_len} bytes)")]
    InvalidRange {
        blob_id: BlobId,
        path: String,
        range: ByteRange,
        blob_len: u64,
    },

    #[error("Handle has been released: {handle}")]
    HandleReleased { handle: String },

    #[error("View has been torn down")]
    ViewClosed,

    #[error("Blob {blob_id} is {size} bytes (max: {max})")]
    TooLarge { blob_id: BlobId, size: u64, max: u64 },

    #[error("Operation not supported by this store")]
    Unsupported,

    #[error("Blob not found: {id}")]
    NotFound { id: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl BlobError {
    /// Create a fetch error for a blob
    pub fn fetch_failed<S: Into<String>>(blob_id: &BlobId, status: Option<u16>, message: S) -> Self {
        Self::FetchFailed {
            blob_id: blob_id.clone(),
            status,
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether a fresh call may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchFailed { .. })
    }
}

//! Error types for the term-vector store.

use thiserror::Error;

/// Main error type for termstore operations.
#[derive(Error, Debug)]
pub enum TermStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A file header did not carry the expected magic, codec name or version.
    #[error("Format error: {0}")]
    Format(String),

    /// On-disk data contradicts an invariant of the format.
    #[error("Corrupt index: {0}")]
    Corruption(String),

    /// A caller broke the writer's call protocol.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Merge aborted: {0}")]
    MergeAborted(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type alias for termstore operations.
pub type Result<T> = std::result::Result<T, TermStoreError>;

impl TermStoreError {
    pub fn format<S: Into<String>>(msg: S) -> Self {
        TermStoreError::Format(msg.into())
    }

    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        TermStoreError::Corruption(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        TermStoreError::InvalidState(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        TermStoreError::InvalidArgument(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        TermStoreError::NotFound(msg.into())
    }

    pub fn storage<S: Into<String>>(msg: S) -> Self {
        TermStoreError::Storage(msg.into())
    }

    /// Whether this error means the on-disk data can no longer be trusted.
    ///
    /// A build or merge that sees one of these must be aborted rather than
    /// committed.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TermStoreError::Corruption(_) | TermStoreError::Format(_)
        )
    }
}

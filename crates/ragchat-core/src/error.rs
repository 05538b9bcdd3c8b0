//! Error taxonomy shared by the core and the application crate.
//!
//! Every variant is scoped to the operation (and therefore the session)
//! that raised it. An empty retrieval is never an error.

use thiserror::Error;

/// Errors raised by ingestion, indexing, and generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RagError {
    /// Text extraction produced nothing usable, or the format is not handled.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The raw upload exceeds the configured byte limit.
    #[error("document too large: {size} bytes (limit {limit})")]
    DocumentTooLarge { size: usize, limit: usize },

    /// The chunker produced more chunks than a single document may hold.
    #[error("document produced {count} chunks (limit {limit})")]
    TooManyChunks { count: usize, limit: usize },

    /// An index invariant was violated during `add`/`remove`.
    ///
    /// The operation is aborted and the published snapshot is left untouched.
    #[error("index corruption: {0}")]
    IndexCorruption(String),

    /// No document (or chunk reference) with the given identity.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The completion service did not finish within the configured timeout.
    #[error("generation timed out after {0}s")]
    GenerationTimeout(u64),

    /// The completion service failed mid-stream or refused the request.
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// A message or upload was routed to a session that has been destroyed.
    #[error("session closed: {0}")]
    SessionClosed(String),
}

impl RagError {
    pub fn generation<E: std::fmt::Display>(err: E) -> Self {
        RagError::GenerationFailure(err.to_string())
    }

    /// Message suitable for surfacing to an end user.
    ///
    /// Index corruption is reported generically; the details go to the log.
    pub fn user_message(&self) -> String {
        match self {
            RagError::IndexCorruption(_) => "internal error while updating the document index".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

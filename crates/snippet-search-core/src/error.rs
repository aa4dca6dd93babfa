//! Domain error taxonomy.
//!
//! Every fallible operation on the indexing and retrieval path returns an
//! [`EngineError`]. The HTTP layer maps each variant onto a stable status
//! code and machine-readable error code; see [`EngineError::code`].

use thiserror::Error;

use crate::models::RepoKey;

/// Errors surfaced by the extractor, tables, training and search.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or malformed request fields.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown `(owner, repo)`, an untrained table, or a missing repository
    /// directory.
    #[error("{0} not found")]
    NotFound(String),

    /// Training was requested for an indexed pair without `retrain` or
    /// `pretrained_ok`.
    #[error("{0} is already trained; pass retrain or pretrained_ok")]
    AlreadyTrained(RepoKey),

    /// Another training run for the same pair has not finished yet.
    #[error("training for {0} is already in progress")]
    TrainingInProgress(RepoKey),

    /// The walk itself could not proceed (unreadable root, broken walker).
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A repository download exhausted its retries.
    #[error("download failed: {0}")]
    Download(String),

    /// Backend failure (database, embedding provider, I/O).
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    /// Machine-readable code used in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidRequest(_) => "bad_request",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyTrained(_) => "already_trained",
            EngineError::TrainingInProgress(_) => "training_in_progress",
            EngineError::Extraction(_) => "internal",
            EngineError::Download(_) => "download_failed",
            EngineError::Store(_) => "internal",
        }
    }

    /// True when the caller can fix the problem by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidRequest(_)
                | EngineError::NotFound(_)
                | EngineError::AlreadyTrained(_)
                | EngineError::TrainingInProgress(_)
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

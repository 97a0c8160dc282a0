//! Error taxonomy for ingestion, merging, retention and store access.

use std::time::Duration;

use crate::model::SourceTier;

/// Bad input. The submission is quarantined and never retried automatically.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot ingest submission from `{source_name}`: {field} {reason}")]
pub struct IngestionParseError {
    pub source_name: String,
    pub field: &'static str,
    pub reason: String,
}

/// Unknown tier or missing policy entry. Non-blocking: the caller falls back to
/// the most conservative tier and only logs/counts this.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no retention policy for tier `{requested}`, falling back to `{fallback}`")]
pub struct PolicyNotFoundError {
    pub requested: String,
    pub fallback: SourceTier,
}

/// Store-level failures as seen by callers of [`crate::store::EventStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("version conflict on `{key}`")]
    Conflict { key: String },

    #[error("record `{id}` not found")]
    NotFound { id: String },

    #[error("submission `{submission_id}` already belongs to `{owner}`")]
    AliasClaimed {
        submission_id: String,
        owner: String,
    },

    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

/// Errors surfaced by the engine's public operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    IngestionParse(#[from] IngestionParseError),

    #[error("merge conflict for submission `{submission_id}` after {attempts} attempts")]
    MergeConflict {
        submission_id: String,
        attempts: u32,
    },

    /// Retryable by the caller.
    #[error("store call `{operation}` timed out after {timeout:?}")]
    StoreTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// True for failures a caller may simply retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::StoreTimeout { .. } | EngineError::MergeConflict { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

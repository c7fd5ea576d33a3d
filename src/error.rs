//! Error kinds shared across the retrieval pipeline.
//!
//! Every stage absorbs most failures internally (see `orchestrator`); this
//! enum carries only the identities that must cross a stage boundary —
//! the fail-loud cases plus the two fail-soft cases that still need to be
//! told apart from a genuine empty result (`VectorStoreError` with no
//! survivors, reported at [`orchestrator::RetrieveOutcome`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid configuration ({field}): {detail}")]
    InvalidConfig { field: String, detail: String },

    #[error("pipeline not found: {name}")]
    NotFound { name: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("all embedders failed for pipeline {pipeline}: {detail}")]
    EmbeddingError { pipeline: String, detail: String },

    #[error("vector store error: {detail}")]
    VectorStoreError { detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RetrievalError {
    pub fn invalid_config(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            detail: detail.into(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn embedding_error(pipeline: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EmbeddingError {
            pipeline: pipeline.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;

//! Error taxonomy shared by every pipeline stage.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("policy ingestion failed: {0}")]
    Ingestion(String),

    #[error("embedding backend error: {0}")]
    EmbeddingBackend(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("normalization failed: {0}")]
    Normalization(String),

    #[error("reasoning backend error: {0}")]
    ReasoningBackend(String),

    #[error("verdict validation failed: {0}")]
    Validation(String),

    #[error("audit cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ingestion(_) => ErrorKind::Ingestion,
            Self::EmbeddingBackend(_) => ErrorKind::EmbeddingBackend,
            Self::Retrieval(_) => ErrorKind::Retrieval,
            Self::Normalization(_) => ErrorKind::Normalization,
            Self::ReasoningBackend(_) => ErrorKind::ReasoningBackend,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Serializable classification of an [`Error`], used in failure descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Ingestion,
    EmbeddingBackend,
    Retrieval,
    Normalization,
    ReasoningBackend,
    Validation,
    Cancelled,
    InvalidConfig,
}

/// Failure reported by an injected collaborator (embedding, vision or
/// reasoning backend). Components translate it into their own [`Error`] kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unreachable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported document format: {0}")]
    Unsupported(String),

    #[error("corrupt document: {0}")]
    Corrupt(String),
}

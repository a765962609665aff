//! Error types shared by every SecureSupport component.
//!
//! The lifecycle manager only recovers from [`SupportError::KeyMismatch`]. Every other
//! remote failure is surfaced to the caller, so transport problems
//! ([`SupportError::RemoteUnavailable`]) and a rejected service credential
//! ([`SupportError::Unauthorized`]) must never be reported as a mismatch.

use std::fmt;
use thiserror::Error;

/// Errors that can occur while managing the encrypted index or answering a question.
#[derive(Debug, Error)]
pub enum SupportError {
    /// The key blob could not be read, written or removed.
    #[error("Key store unavailable at {location}: {reason}")]
    KeyStoreUnavailable { location: String, reason: String },

    /// Network failure or the vector service is down.
    #[error("Vector service unavailable: {0}")]
    RemoteUnavailable(String),

    /// The service rejected our API key.
    #[error("Vector service rejected the API key: {0}")]
    Unauthorized(String),

    /// The index exists but cannot be opened with the local encryption key.
    #[error("Encryption key does not match index '{0}'")]
    KeyMismatch(String),

    /// The named index does not exist on the service.
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// Any other non-success answer from the vector service.
    #[error("Vector service error: {0}")]
    Remote(String),

    /// Embedding model error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// LLM error
    #[error("Generation error: {0}")]
    Generation(String),

    /// The ticket document could not be read or parsed.
    #[error("Ticket source error: {0}")]
    TicketSource(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("top_k must be a positive integer")]
    InvalidTopK,

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SupportError {
    /// True for the single failure mode that routes `ensure()` through recovery.
    pub fn is_key_mismatch(&self) -> bool {
        matches!(self, SupportError::KeyMismatch(_))
    }
}

pub type SupportResult<T> = Result<T, SupportError>;

/// The externally visible step that failed.
///
/// The vector service, the embedding model and the LLM fail independently, so the CLI
/// reports which of them broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initialization,
    Search,
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Initialization => "initialization",
            Stage::Search => "search",
            Stage::Generation => "generation",
        };
        f.write_str(name)
    }
}

/// A [`SupportError`] tagged with the [`Stage`] it happened in.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: SupportError,
}

impl StageError {
    pub fn new(stage: Stage, source: SupportError) -> Self {
        Self { stage, source }
    }
}

/// Attach a [`Stage`] to any [`SupportResult`].
pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> StageContext<T> for SupportResult<T> {
    fn stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|source| StageError::new(stage, source))
    }
}

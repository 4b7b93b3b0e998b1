//! Engine Error Types
//!
//! One error enum for the whole engine. Storage and model failures bubble up
//! with context; best-effort phases (metabolism, crystallisation, background
//! deletes) log and continue instead of returning these.

use tokio_util::sync::CancellationToken;

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Row or node not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// Ingest hit the (content_hash, memory_group) dedup key
    #[error("Duplicate content: {0}")]
    DuplicateContent(String),
    /// Cube was created with an incompatible schema or embedding model
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
    /// Database error
    #[error("Storage error: {0}")]
    StorageIo(#[from] rusqlite::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Retry candidate (lock contention, transient backend failure)
    #[error("Transient error: {0}")]
    Transient(String),
    /// Embedder or chat model failure
    #[error("External model error: {0}")]
    ExternalModel(String),
    /// Invalid or inconsistent configuration
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// The caller's context was cancelled
    #[error("Cancelled")]
    Cancelled,
    /// Unresolved contradiction, surfaced only when the caller asks for it
    #[error("Unresolved conflict: {0}")]
    Conflict(String),
    /// Malformed payloads from external models
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

/// Bail out with `Cancelled` when the caller's context has been cancelled.
///
/// Engines call this between suspension points so long-running loops abort
/// promptly on cancel.
pub fn ensure_active(ctx: &CancellationToken) -> Result<()> {
    if ctx.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

//! Error types for Tagpulse

use thiserror::Error;

/// Errors surfaced by fallible Tagpulse operations.
///
/// The tracking core itself never fails: malformed observations are skipped and
/// storage failures degrade to "no identity". These variants cover the edges
/// where a caller hands us data to parse or a backend to talk to.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Failed to parse signal: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generation already pending for story: {0}")]
    GenerationPending(String),

    #[error("Page session already torn down")]
    SessionClosed,

    #[error("No page is open")]
    NoPage,
}

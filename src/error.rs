use thiserror::Error;

/// Outcomes callers need to branch on rather than just log and continue.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("relation target {0} not found, falling back to NEW")]
    MissingRelationTarget(String),

    #[error("required configuration missing: {0}")]
    ConfigMissing(String),

    #[error("failed to parse LLM output after repair attempt: {0}")]
    ParseFailure(String),

    #[error("note not found: {0}")]
    NoteNotFound(String),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("checkpoint already exists for job {0}")]
    AlreadyExists(String),

    /// Optimistic-concurrency rejection; re-read and retry.
    #[error("concurrent update conflict for job {0}")]
    Conflict(String),

    #[error("state i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("state transport error: {0}")]
    Transport(String),
}

impl StateError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StateError::Conflict(_))
    }
}

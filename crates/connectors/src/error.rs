use thiserror::Error;

/// All errors surfaced by a dialect adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The source is unreachable or rejected the credentials.
    #[error("failed to connect to source: {0}")]
    Connect(String),

    #[error("no such table: {0}")]
    NoSuchTable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The table exposes no primary key, unique index or other usable
    /// ordering.
    #[error("no pagination key available for table: {0}")]
    NoKeyAvailable(String),

    /// A page read failed. Retryable failures cover transient transport and
    /// timeout conditions; permanent ones cover bad predicates and driver
    /// misuse.
    #[error("page fetch failed: {message}")]
    PageFetch { message: String, retryable: bool },

    /// The adapter was constructed from an incomplete source configuration.
    #[error("source misconfigured: {0}")]
    Config(String),
}

impl AdapterError {
    pub fn fetch_retryable(err: impl std::fmt::Display) -> Self {
        AdapterError::PageFetch {
            message: err.to_string(),
            retryable: true,
        }
    }

    pub fn fetch_permanent(err: impl std::fmt::Display) -> Self {
        AdapterError::PageFetch {
            message: err.to_string(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::PageFetch {
                retryable: true,
                ..
            }
        )
    }
}

use connectors::error::AdapterError;
use sink::error::SinkError;
use state::error::StateError;
use thiserror::Error;

/// Engine-level error taxonomy.
///
/// The engine is the only component that turns these into checkpoint
/// status changes; adapters and sinks just bubble up.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The source was unreachable or rejected the credentials. No
    /// checkpoint status is written for this one.
    #[error("source connection failed: {0}")]
    Connect(String),

    /// Permanent adapter failure (missing table, permissions, bad
    /// predicate).
    #[error(transparent)]
    Adapter(AdapterError),

    #[error("no unique ordering available for table {0}")]
    NoUniqueOrdering(String),

    /// Another worker holds the lease; nothing was touched.
    #[error("job {0} is busy: lease is held by another worker")]
    Busy(String),

    /// A lease renewal failed mid-run; writing stopped at the last flushed
    /// checkpoint.
    #[error("lease lost for job {0}")]
    LeaseLost(String),

    #[error("extraction canceled")]
    Canceled,

    #[error("page fetch failed after {attempts} attempts: {message}")]
    FetchExhausted { attempts: usize, message: String },

    #[error("sink write failed: {0}")]
    Sink(#[from] SinkError),

    #[error("state store failure: {0}")]
    State(#[from] StateError),

    #[error("invalid job: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Splits configuration/validation mistakes from runtime failures; the
    /// CLI maps the former to its own exit code.
    pub fn is_config(&self) -> bool {
        matches!(self, ExtractError::Config(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, ExtractError::Busy(_))
    }

    pub(crate) fn from_adapter(err: AdapterError) -> Self {
        match err {
            AdapterError::Connect(message) => ExtractError::Connect(message),
            AdapterError::Config(message) => ExtractError::Config(message),
            other => ExtractError::Adapter(other),
        }
    }
}

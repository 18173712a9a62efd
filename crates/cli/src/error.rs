use engine::ExtractError;
use state::error::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl CliError {
    /// 0 success, 1 configuration/validation, 2 extraction failure,
    /// 3 lease denied.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 1,
            CliError::Extract(e) if e.is_busy() => 3,
            CliError::Extract(e) if e.is_config() => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_maps_to_exit_code_three() {
        let err = CliError::Extract(ExtractError::Busy("job".into()));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn validation_maps_to_exit_code_one() {
        assert_eq!(CliError::Config("missing".into()).exit_code(), 1);
        let err = CliError::Extract(ExtractError::Config("bad".into()));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn runtime_failures_map_to_exit_code_two() {
        let err = CliError::Extract(ExtractError::Canceled);
        assert_eq!(err.exit_code(), 2);
    }
}

//! CLI error types.

use std::path::PathBuf;

use thiserror::Error;

use irss_media::MediaError;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Input not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// True when the run never started processing items.
    pub fn is_setup_fatal(&self) -> bool {
        match self {
            CliError::InvalidArgument(_) | CliError::InputNotFound(_) | CliError::ConfigError(_) => {
                true
            }
            CliError::Media(e) => e.is_setup_fatal(),
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irss_models::ExecutionStrategy;

    #[test]
    fn test_setup_fatal_classification() {
        assert!(CliError::invalid_argument("bad").is_setup_fatal());
        assert!(CliError::InputNotFound(PathBuf::from("/nope")).is_setup_fatal());
        assert!(CliError::from(MediaError::NoExecutionStrategy {
            lane: 0,
            attempts: vec![format!("{}: unavailable", ExecutionStrategy::Cpu)],
        })
        .is_setup_fatal());
        assert!(!CliError::from(MediaError::inference("nan")).is_setup_fatal());
        assert!(!CliError::Io(std::io::Error::other("disk full")).is_setup_fatal());
    }

    #[test]
    fn test_exit_code_nonzero() {
        assert_eq!(CliError::config_error("x").exit_code(), 1);
    }
}

//! Error types for media and pipeline operations.

use std::path::PathBuf;
use thiserror::Error;

use irss_models::ExecutionStrategy;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Execution strategy {strategy} unavailable: {reason}")]
    StrategyUnavailable {
        strategy: ExecutionStrategy,
        reason: String,
    },

    #[error("No execution strategy could be constructed for lane {lane}: {}", attempts.join("; "))]
    NoExecutionStrategy { lane: usize, attempts: Vec<String> },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Channel '{0}' closed")]
    ChannelClosed(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a model not found error.
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    /// Create a strategy construction error.
    pub fn strategy_unavailable(strategy: ExecutionStrategy, reason: impl Into<String>) -> Self {
        Self::StrategyUnavailable {
            strategy,
            reason: reason.into(),
        }
    }

    /// Create an inference failure error.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error aborts a run before any item is processed.
    ///
    /// Everything else is scoped to a single item.
    pub fn is_setup_fatal(&self) -> bool {
        matches!(
            self,
            MediaError::NoExecutionStrategy { .. }
                | MediaError::ModelNotFound(_)
                | MediaError::InvalidConfig(_)
                | MediaError::FfmpegNotFound
                | MediaError::FfprobeNotFound
        )
    }
}

//! Error types for the prom input.

use std::time::Duration;

use datakit_framework::{AgentError, ErrorType};
use thiserror::Error;

use crate::parser::ParseError;

/// Result type alias using [`PromError`].
pub type Result<T> = std::result::Result<T, PromError>;

/// Errors raised while configuring or running a prom input.
#[derive(Error, Debug)]
pub enum PromError {
    /// Malformed configuration; fatal to initialization.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A target could not be fetched.
    #[error("Failed to fetch {target}: {message}")]
    Fetch {
        target: String,
        kind: ErrorType,
        message: String,
    },

    /// A malformed exposition line.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The feed rejected a batch.
    #[error("Feed error: {0}")]
    Feed(#[from] AgentError),

    /// The local dump file would grow past its cap.
    #[error("Output file '{path}' would exceed max size: {size} > {max} bytes")]
    FileSizeExceeded { path: String, size: u64, max: u64 },

    #[error("pause prom failed: no response within {0:?}")]
    PauseTimeout(Duration),

    #[error("resume prom failed: no response within {0:?}")]
    ResumeTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PromError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a fetch error.
    pub fn fetch(target: impl Into<String>, kind: ErrorType, message: impl Into<String>) -> Self {
        Self::Fetch {
            target: target.into(),
            kind,
            message: message.into(),
        }
    }

    /// Classification used in last-error reports.
    pub fn error_type(&self) -> ErrorType {
        match self {
            PromError::Config(_) => ErrorType::ConfigError,
            PromError::Fetch { kind, .. } => *kind,
            PromError::Parse(_) => ErrorType::ParseError,
            PromError::Feed(_) => ErrorType::Feed,
            PromError::FileSizeExceeded { .. } => ErrorType::FileSize,
            PromError::PauseTimeout(_) | PromError::ResumeTimeout(_) => ErrorType::Timeout,
            PromError::Io(_) => ErrorType::Other,
        }
    }
}

impl From<datakit_common::Error> for PromError {
    fn from(err: datakit_common::Error) -> Self {
        Self::Config(err.to_string())
    }
}

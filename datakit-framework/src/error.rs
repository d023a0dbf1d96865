//! Error types for the agent framework.

use thiserror::Error;

/// Result type alias using [`AgentError`].
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur while running an agent.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Zenoh connection error.
    #[error("Zenoh connection error: {0}")]
    ZenohConnection(String),

    /// Zenoh session error.
    #[error("Zenoh session error: {0}")]
    ZenohSession(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing error.
    #[error("Failed to publish to {key}: {message}")]
    Publish { key: String, message: String },

    /// The feed queue is full and the caller asked not to wait.
    #[error("Feed queue full, dropped {points} point(s) from '{name}'")]
    FeedQueueFull { name: String, points: usize },

    /// The feed worker has stopped.
    #[error("Feed closed")]
    FeedClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<zenoh::Error> for AgentError {
    fn from(err: zenoh::Error) -> Self {
        Self::ZenohSession(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<datakit_common::Error> for AgentError {
    fn from(err: datakit_common::Error) -> Self {
        match err {
            datakit_common::Error::Config(msg) => Self::Config(msg),
            datakit_common::Error::Io(e) => Self::Io(e),
            datakit_common::Error::Zenoh(e) => Self::ZenohSession(e.to_string()),
            other => Self::Serialization(other.to_string()),
        }
    }
}

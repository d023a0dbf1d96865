//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use datakit_common::{Format, KEY_PREFIX, load_config};

use crate::error::{AgentError, Result};
use crate::{LoggingConfig, ZenohConfig};

/// Settings of the Zenoh-backed feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Key expression prefix for everything the agent publishes.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Serialization format for points.
    #[serde(default)]
    pub format: Format,

    /// Number of batches buffered between inputs and the publish worker.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

fn default_queue_size() -> usize {
    1024
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            format: Format::default(),
            queue_size: default_queue_size(),
        }
    }
}

/// Trait for agent configuration types.
///
/// Implement this trait for an agent's configuration struct to get
/// loading, validation, and access to the common config sections.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use datakit_framework::{AgentConfig, FeedConfig, LoggingConfig, ZenohConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyAgentConfig {
///     pub zenoh: ZenohConfig,
///     pub logging: LoggingConfig,
///     pub feed: FeedConfig,
///     pub inputs: Vec<MyInputConfig>,
/// }
///
/// impl AgentConfig for MyAgentConfig {
///     fn zenoh(&self) -> &ZenohConfig { &self.zenoh }
///     fn logging(&self) -> &LoggingConfig { &self.logging }
///     fn feed(&self) -> &FeedConfig { &self.feed }
/// }
/// ```
pub trait AgentConfig: Sized + DeserializeOwned {
    /// Get the Zenoh configuration.
    fn zenoh(&self) -> &ZenohConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the feed configuration.
    fn feed(&self) -> &FeedConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        if self.feed().queue_size == 0 {
            return Err(AgentError::validation("feed.queue_size must be > 0"));
        }
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// `.toml` files are parsed as TOML, anything else as JSON5.
    /// Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(AgentError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let config: Self = load_config(path)?;
        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        zenoh: ZenohConfig,
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        feed: FeedConfig,
    }

    impl AgentConfig for TestConfig {
        fn zenoh(&self) -> &ZenohConfig {
            &self.zenoh
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn feed(&self) -> &FeedConfig {
            &self.feed
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.toml");
        assert!(matches!(result, Err(AgentError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_feed_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.feed.key_prefix, "datakit");
        assert_eq!(config.feed.queue_size, 1024);
        assert_eq!(config.feed.format, Format::Json);
    }

    #[test]
    fn test_zero_queue_rejected() {
        let mut file = tempfile::Builder::new()
            .suffix(".json5")
            .tempfile()
            .unwrap();
        writeln!(file, "{{ feed: {{ queue_size: 0 }} }}").unwrap();

        let result = TestConfig::load(file.path());
        assert!(matches!(result, Err(AgentError::ConfigValidation(_))));
    }
}

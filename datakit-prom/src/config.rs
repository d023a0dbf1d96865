//! Configuration for the prom input.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use datakit_common::{GlobalTagsConfig, LoggingConfig, ZenohConfig};
use datakit_framework::{AgentConfig, AgentError, FeedConfig};

use crate::classify::MeasurementRule;
use crate::error::{PromError, Result};

/// Default size cap of the raw dump file (32 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 32 * 1024 * 1024;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromAgentConfig {
    /// Zenoh connection settings.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Feed settings.
    #[serde(default)]
    pub feed: FeedConfig,

    /// Tags shared by every input.
    #[serde(default)]
    pub global_tags: GlobalTagsConfig,

    /// Configured inputs.
    #[serde(default)]
    pub inputs: InputsConfig,
}

/// Input instances, grouped by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputsConfig {
    #[serde(default)]
    pub prom: Vec<PromInputConfig>,
}

impl AgentConfig for PromAgentConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn feed(&self) -> &FeedConfig {
        &self.feed
    }

    fn validate(&self) -> datakit_framework::Result<()> {
        if self.feed.queue_size == 0 {
            return Err(AgentError::validation("feed.queue_size must be > 0"));
        }
        if self.inputs.prom.is_empty() {
            return Err(AgentError::validation("no [[inputs.prom]] configured"));
        }
        for input in &self.inputs.prom {
            input
                .validate()
                .map_err(|e| AgentError::validation(format!("input '{}': {}", input.source, e)))?;
        }
        Ok(())
    }
}

/// Tag rename settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsRenameConfig {
    /// Rename even if the new key is already present.
    #[serde(default)]
    pub overwrite_exist_tags: bool,

    /// Old key to new key.
    #[serde(default)]
    pub mapping: HashMap<String, String>,
}

/// Feed points as logging records instead of metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsLoggingConfig {
    #[serde(default)]
    pub enable: bool,

    /// Service name; defaults to the point's `service` tag, then its measurement.
    #[serde(default)]
    pub service: String,
}

/// HTTP authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// `Authorization: Bearer <token>`; the file is re-read on every request.
    BearerToken {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        token_file: Option<PathBuf>,
    },
    /// HTTP basic authentication.
    BasicAuth {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
}

/// One prom input instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromInputConfig {
    /// Logical collector name.
    #[serde(default = "default_source")]
    pub source: String,

    /// Scrape targets: `http(s)://` URLs or local file paths.
    #[serde(default)]
    pub urls: Vec<String>,

    /// Deprecated single target, appended to `urls`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Per-request timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Idle connection keep-alive.
    #[serde(default, with = "humantime_serde")]
    pub keep_alive: Option<Duration>,

    /// 0 buffers whole scrapes; >0 flushes every `stream_size` points.
    #[serde(default)]
    pub stream_size: usize,

    #[serde(default)]
    pub metric_types: Vec<String>,

    #[serde(default)]
    pub metric_name_filter: Vec<String>,

    #[serde(default)]
    pub metric_name_filter_ignore: Vec<String>,

    #[serde(default)]
    pub measurement_prefix: String,

    #[serde(default)]
    pub measurement_name: String,

    #[serde(default)]
    pub measurements: Vec<MeasurementRule>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub tags_ignore: Vec<String>,

    #[serde(default)]
    pub tags_rename: TagsRenameConfig,

    #[serde(default)]
    pub ignore_tag_kv_match: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    #[serde(default)]
    pub tls_open: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<PathBuf>,

    /// Dial this Unix socket instead of the URL's host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uds_path: Option<PathBuf>,

    #[serde(default)]
    pub disable_host_tag: bool,

    #[serde(default)]
    pub disable_instance_tag: bool,

    #[serde(default)]
    pub disable_info_tag: bool,

    #[serde(default = "default_true")]
    pub honor_timestamps: bool,

    /// Log fetch failures at debug and skip last-error reports.
    #[serde(default)]
    pub ignore_req_err: bool,

    #[serde(default)]
    pub as_logging: AsLoggingConfig,

    /// Raw-dump file; switches the input to dump mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_true")]
    pub election: bool,

    /// Schema tables declaring integer fields.
    #[serde(default)]
    pub measurement_schemas: Vec<PathBuf>,
}

fn default_source() -> String {
    "prom".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for PromInputConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            urls: Vec::new(),
            url: None,
            interval: default_interval(),
            timeout: default_timeout(),
            keep_alive: None,
            stream_size: 0,
            metric_types: Vec::new(),
            metric_name_filter: Vec::new(),
            metric_name_filter_ignore: Vec::new(),
            measurement_prefix: String::new(),
            measurement_name: String::new(),
            measurements: Vec::new(),
            tags: BTreeMap::new(),
            tags_ignore: Vec::new(),
            tags_rename: TagsRenameConfig::default(),
            ignore_tag_kv_match: HashMap::new(),
            http_headers: BTreeMap::new(),
            auth: None,
            tls_open: false,
            tls_ca: None,
            tls_cert: None,
            tls_key: None,
            uds_path: None,
            disable_host_tag: false,
            disable_instance_tag: false,
            disable_info_tag: false,
            honor_timestamps: true,
            ignore_req_err: false,
            as_logging: AsLoggingConfig::default(),
            output: None,
            max_file_size: default_max_file_size(),
            election: true,
            measurement_schemas: Vec::new(),
        }
    }
}

impl PromInputConfig {
    /// All targets, with the deprecated `url` appended.
    pub fn targets(&self) -> Vec<String> {
        let mut targets = self.urls.clone();
        if let Some(url) = &self.url {
            targets.push(url.clone());
        }
        targets
    }

    /// Checks that do not need any I/O.
    pub fn validate(&self) -> Result<()> {
        if self.targets().is_empty() {
            return Err(PromError::config("no urls configured"));
        }
        if self.interval.is_zero() {
            return Err(PromError::config("interval must be > 0"));
        }
        if self.max_file_size == 0 {
            return Err(PromError::config("max_file_size must be > 0"));
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(PromError::config("tls_cert and tls_key must be set together"));
        }
        if let Some(AuthConfig::BearerToken {
            token: None,
            token_file: None,
        }) = &self.auth
        {
            return Err(PromError::config(
                "bearer_token auth requires token or token_file",
            ));
        }
        Ok(())
    }
}

//! Process-wide tag providers.
//!
//! Inputs never reach for global state to discover the host or election
//! tags; a [`Tagger`] is handed to them at construction time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source of the global tags merged into every point.
pub trait Tagger: Send + Sync {
    /// Tags applied when an input runs in standalone mode.
    fn host_tags(&self) -> BTreeMap<String, String>;

    /// Tags applied when an input takes part in election.
    fn election_tags(&self) -> BTreeMap<String, String>;
}

/// Global tag configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalTagsConfig {
    /// Tags for standalone (non-election) inputs.
    #[serde(default)]
    pub host: BTreeMap<String, String>,

    /// Tags for election inputs.
    #[serde(default)]
    pub election: BTreeMap<String, String>,
}

/// A [`Tagger`] backed by fixed maps.
#[derive(Debug, Clone, Default)]
pub struct StaticTagger {
    host: BTreeMap<String, String>,
    election: BTreeMap<String, String>,
}

impl StaticTagger {
    pub fn new(host: BTreeMap<String, String>, election: BTreeMap<String, String>) -> Self {
        Self { host, election }
    }

    /// Build a tagger from configuration, adding `host=<hostname>` to the
    /// host tags when none is configured.
    pub fn from_config(config: &GlobalTagsConfig) -> Self {
        let mut host = config.host.clone();
        if !host.contains_key("host") {
            if let Some(name) = local_hostname() {
                host.insert("host".to_string(), name);
            }
        }
        Self::new(host, config.election.clone())
    }
}

impl Tagger for StaticTagger {
    fn host_tags(&self) -> BTreeMap<String, String> {
        self.host.clone()
    }

    fn election_tags(&self) -> BTreeMap<String, String> {
        self.election.clone()
    }
}

fn local_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

//! Agent status announced on `<key_prefix>/@/status`.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::publisher::Publisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Offline,
}

/// A configured input and how many targets it scrapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSummary {
    pub source: String,
    pub targets: usize,
}

/// One status announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent: String,
    pub version: String,
    pub state: RunState,
    /// Millis since epoch.
    pub started_at: i64,
    /// Millis since epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputSummary>,
}

impl AgentStatus {
    /// Total targets across all inputs.
    pub fn targets(&self) -> usize {
        self.inputs.iter().map(|i| i.targets).sum()
    }
}

/// What the runner knows about the agent between announcements.
#[derive(Debug, Clone)]
pub(crate) struct StatusBoard {
    agent: String,
    version: String,
    started_at: i64,
    inputs: Vec<InputSummary>,
}

impl StatusBoard {
    pub fn new(agent: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            version: version.into(),
            started_at: Utc::now().timestamp_millis(),
            inputs: Vec::new(),
        }
    }

    pub fn register_input(&mut self, source: impl Into<String>, targets: usize) {
        self.inputs.push(InputSummary {
            source: source.into(),
            targets,
        });
    }

    pub fn status(&self, state: RunState) -> AgentStatus {
        AgentStatus {
            agent: self.agent.clone(),
            version: self.version.clone(),
            state,
            started_at: self.started_at,
            timestamp: Utc::now().timestamp_millis(),
            inputs: self.inputs.clone(),
        }
    }

    pub async fn announce(&self, publisher: &Publisher, state: RunState) -> Result<()> {
        publisher
            .publish_json(&publisher.keys().status_key(), &self.status(state))
            .await
    }
}

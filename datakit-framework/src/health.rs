//! Agent health monitoring.
//!
//! This module provides:
//! - [`AgentHealth`] for tracking agent-wide counters
//! - [`TargetLiveness`] for per-target availability
//! - last-error bookkeeping for the reports inputs emit

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::feeder::LastError;
use crate::publisher::Publisher;

/// Consecutive failures after which a target is reported offline.
const OFFLINE_AFTER_FAILURES: u32 = 3;

/// Agent health metrics.
#[derive(Debug)]
pub struct AgentHealth {
    /// Agent name.
    agent_name: String,
    /// Start time for uptime calculation.
    start_time: Instant,
    /// Total points published.
    points_published: AtomicU64,
    /// Total errors reported.
    errors_total: AtomicU64,
    /// Per-target liveness tracking.
    targets: RwLock<HashMap<String, TargetState>>,
    /// Most recent error per input source.
    last_errors: RwLock<HashMap<String, LastError>>,
    /// Publisher for health reports.
    publisher: Option<Publisher>,
}

#[derive(Debug, Clone)]
struct TargetState {
    status: TargetStatus,
    last_seen: i64,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            status: TargetStatus::Unknown,
            last_seen: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Target availability status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    /// Target is responding normally.
    Online,
    /// Target is not responding.
    Offline,
    /// Target failed recently but not often enough to be offline.
    Degraded,
    /// Target was never scraped.
    #[default]
    Unknown,
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::Online => write!(f, "online"),
            TargetStatus::Offline => write!(f, "offline"),
            TargetStatus::Degraded => write!(f, "degraded"),
            TargetStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Health snapshot for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub agent: String,
    /// Overall health status.
    pub status: String,
    pub uptime_secs: u64,
    pub targets_total: u64,
    pub targets_online: u64,
    pub targets_offline: u64,
    pub points_published: u64,
    pub errors_total: u64,
}

/// Target liveness information for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetLiveness {
    pub target: String,
    pub status: TargetStatus,
    /// Last successful scrape (millis since epoch).
    pub last_seen: i64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl AgentHealth {
    /// Create a new health tracker.
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            start_time: Instant::now(),
            points_published: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            targets: RwLock::new(HashMap::new()),
            last_errors: RwLock::new(HashMap::new()),
            publisher: None,
        }
    }

    /// Set the publisher for health reports.
    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Record that a target scrape succeeded.
    pub fn record_target_success(&self, target: &str) {
        let mut targets = self.targets.write();
        let state = targets.entry(target.to_string()).or_default();

        state.status = TargetStatus::Online;
        state.last_seen = chrono::Utc::now().timestamp_millis();
        state.consecutive_failures = 0;
        state.last_error = None;
    }

    /// Record that a target scrape failed.
    pub fn record_target_failure(&self, target: &str, error: &str) {
        let mut targets = self.targets.write();
        let state = targets.entry(target.to_string()).or_default();

        state.consecutive_failures += 1;
        state.last_error = Some(error.to_string());
        state.status = if state.consecutive_failures >= OFFLINE_AFTER_FAILURES {
            TargetStatus::Offline
        } else {
            TargetStatus::Degraded
        };
    }

    /// Record a scrape outcome; `error` is set when it failed.
    pub fn record_scrape(&self, target: &str, error: Option<&str>) {
        match error {
            None => self.record_target_success(target),
            Some(error) => self.record_target_failure(target, error),
        }
    }

    /// Record a last-error report.
    pub fn record_last_error(&self, error: &LastError) {
        self.errors_total.fetch_add(1, Ordering::SeqCst);

        let key = format!("{}/{}", error.input, error.source);
        self.last_errors.write().insert(key, error.clone());
    }

    /// Most recent error reported by an input source.
    pub fn last_error(&self, input: &str, source: &str) -> Option<LastError> {
        self.last_errors
            .read()
            .get(&format!("{}/{}", input, source))
            .cloned()
    }

    /// Record that points were published.
    pub fn record_points_published(&self, count: u64) {
        self.points_published.fetch_add(count, Ordering::SeqCst);
    }

    /// Get a snapshot of current health metrics.
    pub fn snapshot(&self) -> HealthSnapshot {
        let targets = self.targets.read();
        let targets_total = targets.len() as u64;
        let targets_offline = targets
            .values()
            .filter(|s| s.status == TargetStatus::Offline)
            .count() as u64;
        let targets_online = targets
            .values()
            .filter(|s| matches!(s.status, TargetStatus::Online | TargetStatus::Degraded))
            .count() as u64;

        let status = if targets_offline == 0 {
            "healthy"
        } else if targets_online > 0 {
            "degraded"
        } else {
            "error"
        };

        HealthSnapshot {
            agent: self.agent_name.clone(),
            status: status.to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            targets_total,
            targets_online,
            targets_offline,
            points_published: self.points_published.load(Ordering::SeqCst),
            errors_total: self.errors_total.load(Ordering::SeqCst),
        }
    }

    /// Get liveness info for a specific target.
    pub fn target_liveness(&self, target: &str) -> Option<TargetLiveness> {
        self.targets
            .read()
            .get(target)
            .map(|state| liveness(target, state))
    }

    /// Publish the health snapshot to Zenoh.
    pub async fn publish_health(&self) -> Result<()> {
        let Some(ref publisher) = self.publisher else {
            return Ok(());
        };

        let snapshot = self.snapshot();
        publisher
            .publish_json(&publisher.keys().health_key(), &snapshot)
            .await
    }

    /// Publish a last-error report to Zenoh.
    pub async fn publish_error(&self, error: &LastError) -> Result<()> {
        let Some(ref publisher) = self.publisher else {
            return Ok(());
        };

        publisher
            .publish_json(&publisher.keys().errors_key(), error)
            .await
    }
}

fn liveness(target: &str, state: &TargetState) -> TargetLiveness {
    TargetLiveness {
        target: target.to_string(),
        status: state.status,
        last_seen: state.last_seen,
        consecutive_failures: state.consecutive_failures,
        last_error: state.last_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeder::ErrorType;

    #[test]
    fn test_health_new() {
        let health = AgentHealth::new("prom");

        let snapshot = health.snapshot();
        assert_eq!(snapshot.agent, "prom");
        assert_eq!(snapshot.status, "healthy");
        assert_eq!(snapshot.targets_total, 0);
    }

    #[test]
    fn test_target_failure_escalates() {
        let health = AgentHealth::new("prom");

        health.record_target_failure("http://a:9100/metrics", "connection refused");
        let liveness = health.target_liveness("http://a:9100/metrics").unwrap();
        assert_eq!(liveness.status, TargetStatus::Degraded);
        assert_eq!(liveness.consecutive_failures, 1);

        health.record_target_failure("http://a:9100/metrics", "connection refused");
        health.record_target_failure("http://a:9100/metrics", "connection refused");
        let liveness = health.target_liveness("http://a:9100/metrics").unwrap();
        assert_eq!(liveness.status, TargetStatus::Offline);
        assert_eq!(liveness.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_recovery() {
        let health = AgentHealth::new("prom");

        for _ in 0..3 {
            health.record_target_failure("t1", "error");
        }
        assert_eq!(health.snapshot().status, "error");

        health.record_target_success("t1");

        let liveness = health.target_liveness("t1").unwrap();
        assert_eq!(liveness.status, TargetStatus::Online);
        assert_eq!(liveness.consecutive_failures, 0);
        assert_eq!(health.snapshot().status, "healthy");
    }

    #[test]
    fn test_partial_outage_is_degraded() {
        let health = AgentHealth::new("prom");
        health.record_target_success("t1");
        for _ in 0..3 {
            health.record_target_failure("t2", "timeout");
        }

        let snapshot = health.snapshot();
        assert_eq!(snapshot.status, "degraded");
        assert_eq!(snapshot.targets_online, 1);
        assert_eq!(snapshot.targets_offline, 1);
    }

    #[test]
    fn test_scrape_failure_keeps_reason() {
        let health = AgentHealth::new("prom");
        health.record_scrape("t1", Some("unexpected status 503 Service Unavailable"));

        let liveness = health.target_liveness("t1").unwrap();
        assert_eq!(
            liveness.last_error.as_deref(),
            Some("unexpected status 503 Service Unavailable")
        );

        health.record_scrape("t1", None);
        let liveness = health.target_liveness("t1").unwrap();
        assert_eq!(liveness.status, TargetStatus::Online);
        assert!(liveness.last_error.is_none());
    }

    #[test]
    fn test_last_error_tracking() {
        let health = AgentHealth::new("prom");
        let err = LastError::new(ErrorType::Fetch, "dial tcp: refused")
            .with_input("prom")
            .with_source("etcd")
            .with_target("http://127.0.0.1:2379/metrics");

        health.record_last_error(&err);

        assert_eq!(
            health.last_error("prom", "etcd").unwrap().message,
            "dial tcp: refused"
        );
        assert!(health.last_error("prom", "coredns").is_none());
        assert_eq!(health.snapshot().errors_total, 1);
    }

    #[test]
    fn test_points_counter() {
        let health = AgentHealth::new("prom");

        health.record_points_published(10);
        health.record_points_published(5);

        assert_eq!(health.snapshot().points_published, 15);
    }
}

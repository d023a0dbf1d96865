//! The sink inputs hand their points to.
//!
//! A [`Feeder`] is shared by every input of an agent and must tolerate
//! concurrent calls. Inputs never wait on it for anything but queue space.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use datakit_common::{Category, Point};

use crate::error::{AgentError, Result};

/// Metadata travelling with a fed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedOptions {
    /// Time spent collecting the batch.
    pub collect_cost: Duration,
    /// Whether the input runs in election mode.
    pub election: bool,
    /// Logical collector name.
    pub source: String,
    /// Wait for queue space instead of failing when the queue is full.
    pub blocking: bool,
}

impl FeedOptions {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn with_collect_cost(mut self, cost: Duration) -> Self {
        self.collect_cost = cost;
        self
    }

    pub fn with_election(mut self, election: bool) -> Self {
        self.election = election;
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }
}

/// Error type classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Request timed out.
    Timeout,
    /// Target refused the connection.
    ConnectionRefused,
    /// Target could not be fetched.
    Fetch,
    /// Malformed payload.
    ParseError,
    /// The feed rejected a batch.
    Feed,
    /// Configuration error.
    ConfigError,
    /// Local dump exceeded its size cap.
    FileSize,
    /// Other/unknown error.
    #[default]
    Other,
}

/// A last-error report for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    /// Timestamp (millis since epoch).
    pub timestamp: i64,
    /// Input kind (e.g. "prom").
    pub input: String,
    /// Logical collector name.
    pub source: String,
    /// Scrape target this error relates to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Error type classification.
    pub error_type: ErrorType,
    /// Error message.
    pub message: String,
}

impl LastError {
    /// Create a new report.
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            input: String::new(),
            source: String::new(),
            target: None,
            error_type,
            message: message.into(),
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the target this error relates to.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Sink for built points and last-error reports.
pub trait Feeder: Send + Sync + 'static {
    /// Deliver a batch of points under `name`.
    fn feed(
        &self,
        name: &str,
        category: Category,
        points: Vec<Point>,
        options: FeedOptions,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Record an error for observability. Never fails.
    fn feed_last_error(&self, error: LastError);

    /// Record the outcome of a scrape of `target`; `error` is the failure
    /// reason, `None` when the scrape succeeded.
    fn record_scrape(&self, target: &str, error: Option<&str>) {
        let _ = (target, error);
    }
}

/// One batch as received by a [`MemoryFeeder`].
#[derive(Debug, Clone)]
pub struct FedBatch {
    pub name: String,
    pub category: Category,
    pub points: Vec<Point>,
    pub options: FeedOptions,
}

/// A [`Feeder`] that keeps everything in memory.
///
/// Used for dry runs and tests. Can be switched to reject batches to
/// exercise feed-failure handling.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeeder {
    batches: Arc<Mutex<Vec<FedBatch>>>,
    errors: Arc<Mutex<Vec<LastError>>>,
    up: Arc<Mutex<Vec<(String, Option<String>)>>>,
    reject: Arc<Mutex<bool>>,
}

impl MemoryFeeder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent feeds fail with [`AgentError::FeedClosed`].
    pub fn set_reject(&self, reject: bool) {
        *self.reject.lock() = reject;
    }

    pub fn batches(&self) -> Vec<FedBatch> {
        self.batches.lock().clone()
    }

    /// All fed points, in feed order.
    pub fn points(&self) -> Vec<Point> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.points.iter().cloned())
            .collect()
    }

    pub fn last_errors(&self) -> Vec<LastError> {
        self.errors.lock().clone()
    }

    /// Scrape outcomes in report order.
    pub fn up_reports(&self) -> Vec<(String, bool)> {
        self.up
            .lock()
            .iter()
            .map(|(target, error)| (target.clone(), error.is_none()))
            .collect()
    }

    /// Targets whose scrape failed, with the reported reason.
    pub fn scrape_failures(&self) -> Vec<(String, String)> {
        self.up
            .lock()
            .iter()
            .filter_map(|(target, error)| Some((target.clone(), error.clone()?)))
            .collect()
    }

    pub fn clear(&self) {
        self.batches.lock().clear();
        self.errors.lock().clear();
        self.up.lock().clear();
    }
}

impl Feeder for MemoryFeeder {
    async fn feed(
        &self,
        name: &str,
        category: Category,
        points: Vec<Point>,
        options: FeedOptions,
    ) -> Result<()> {
        if *self.reject.lock() {
            return Err(AgentError::FeedClosed);
        }

        self.batches.lock().push(FedBatch {
            name: name.to_string(),
            category,
            points,
            options,
        });
        Ok(())
    }

    fn feed_last_error(&self, error: LastError) {
        self.errors.lock().push(error);
    }

    fn record_scrape(&self, target: &str, error: Option<&str>) {
        self.up
            .lock()
            .push((target.to_string(), error.map(str::to_string)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_memory_feeder_records_batches() {
        let feeder = MemoryFeeder::new();
        let points = vec![Point::new("up").with_field("up", 1.0)];

        assert_ok!(
            feeder
                .feed(
                    "prom/test",
                    Category::Metric,
                    points,
                    FeedOptions::new("test").with_election(true),
                )
                .await
        );

        let batches = feeder.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].name, "prom/test");
        assert!(batches[0].options.election);
        assert_eq!(feeder.points()[0].measurement, "up");
    }

    #[tokio::test]
    async fn test_memory_feeder_reject() {
        let feeder = MemoryFeeder::new();
        feeder.set_reject(true);

        assert_err!(
            feeder
                .feed("x", Category::Logging, Vec::new(), FeedOptions::default())
                .await
        );
        assert!(feeder.batches().is_empty());
    }

    #[test]
    fn test_last_error_builder() {
        let err = LastError::new(ErrorType::Timeout, "request timed out")
            .with_input("prom")
            .with_source("etcd")
            .with_target("http://127.0.0.1:2379/metrics");

        assert_eq!(err.input, "prom");
        assert_eq!(err.source, "etcd");
        assert_eq!(err.error_type, ErrorType::Timeout);
        assert!(err.target.is_some());

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"error_type\":\"timeout\""));
    }
}

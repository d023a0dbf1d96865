//! Delivery of built points to the feed, and the raw dump file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use datakit_common::{Category, FieldValue, Point};
use datakit_framework::{ErrorType, FeedOptions, Feeder, LastError};

use crate::config::AsLoggingConfig;
use crate::error::{PromError, Result};

/// Input name used in feed names and last-error reports.
pub const INPUT_NAME: &str = "prom";

/// `status` field of points fed as logging.
const LOG_STATUS: &str = "INFO";

/// Hands point batches to a [`Feeder`].
///
/// Feed failures are logged and reported as last errors; they never reach
/// the caller.
pub struct OutputAdapter<F: Feeder> {
    feeder: Arc<F>,
    source: String,
    election: bool,
    as_logging: AsLoggingConfig,
}

impl<F: Feeder> OutputAdapter<F> {
    pub fn new(
        feeder: Arc<F>,
        source: impl Into<String>,
        election: bool,
        as_logging: AsLoggingConfig,
    ) -> Self {
        Self {
            feeder,
            source: source.into(),
            election,
            as_logging,
        }
    }

    pub fn feeder(&self) -> &Arc<F> {
        &self.feeder
    }

    /// Feed name of metric batches.
    pub fn metric_feed_name(&self) -> String {
        format!("{}/{}", INPUT_NAME, self.source)
    }

    /// Deliver a batch. Returns the number of points the feed accepted.
    pub async fn deliver(&self, points: Vec<Point>, cost: Duration, blocking: bool) -> usize {
        if points.is_empty() {
            return 0;
        }

        let options = FeedOptions::new(&self.source)
            .with_collect_cost(cost)
            .with_election(self.election)
            .blocking(blocking);

        if !self.as_logging.enable {
            let count = points.len();
            let name = self.metric_feed_name();
            return match self
                .feeder
                .feed(&name, Category::Metric, points, options)
                .await
            {
                Ok(()) => count,
                Err(e) => {
                    self.report_feed_error(&name, &e.to_string());
                    0
                }
            };
        }

        let mut fed = 0;
        for point in points {
            let point = self.as_log(point);
            let name = point.measurement.clone();
            match self
                .feeder
                .feed(&name, Category::Logging, vec![point], options.clone())
                .await
            {
                Ok(()) => fed += 1,
                Err(e) => self.report_feed_error(&name, &e.to_string()),
            }
        }
        fed
    }

    fn as_log(&self, mut point: Point) -> Point {
        let service = if !self.as_logging.service.is_empty() {
            self.as_logging.service.clone()
        } else {
            point
                .tag("service")
                .map(str::to_string)
                .unwrap_or_else(|| point.measurement.clone())
        };
        point.tags.insert("service".to_string(), service);
        point
            .fields
            .insert("status".to_string(), FieldValue::Str(LOG_STATUS.to_string()));
        point
    }

    fn report_feed_error(&self, name: &str, message: &str) {
        tracing::warn!(source = %self.source, feed = %name, error = %message, "Feed failed");
        self.feeder.feed_last_error(
            LastError::new(ErrorType::Feed, message)
                .with_input(INPUT_NAME)
                .with_source(&self.source),
        );
    }
}

/// Local file the raw bodies are appended to in dump mode.
#[derive(Debug, Clone)]
pub struct DumpFile {
    path: PathBuf,
    max_size: u64,
}

impl DumpFile {
    pub fn new(path: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            path: path.into(),
            max_size,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Remove the previous cycle's dump.
    pub async fn reset(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append a body. Nothing is written if the file would exceed its cap.
    pub async fn append(&self, body: &[u8]) -> Result<u64> {
        let current = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let size = current + body.len() as u64;
        if size > self.max_size {
            return Err(PromError::FileSizeExceeded {
                path: self.path.display().to_string(),
                size,
                max: self.max_size,
            });
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(body).await?;
        file.flush().await?;
        Ok(size)
    }
}

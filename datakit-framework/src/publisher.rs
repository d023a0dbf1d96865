//! Point publisher for Zenoh.

use std::sync::Arc;

use datakit_common::{Category, Format, KeyExprBuilder, Point, encode};

use crate::error::{AgentError, Result};

/// Publisher for sending points to Zenoh.
///
/// Wraps a Zenoh session and serializes each [`Point`] to
/// `<prefix>/<category>/<feed>/<measurement>`.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    keys: KeyExprBuilder,
    format: Format,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(
        session: Arc<zenoh::Session>,
        key_prefix: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            keys: KeyExprBuilder::with_prefix(key_prefix),
            format,
        }
    }

    /// Get the key prefix.
    pub fn key_prefix(&self) -> &str {
        self.keys.prefix()
    }

    /// Get the key builder.
    pub fn keys(&self) -> &KeyExprBuilder {
        &self.keys
    }

    /// Get the serialization format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Publish one point of a feed.
    pub async fn publish(&self, category: Category, feed: &str, point: &Point) -> Result<()> {
        let key = self.keys.build(category, feed, &point.measurement);
        let payload =
            encode(point, self.format).map_err(|e| AgentError::Serialization(e.to_string()))?;

        self.publish_raw(&key, payload).await
    }

    /// Publish a batch of points, logging failures.
    pub async fn publish_batch(
        &self,
        category: Category,
        feed: &str,
        points: &[Point],
    ) -> PublishStats {
        let mut stats = PublishStats::default();

        for point in points {
            match self.publish(category, feed, point).await {
                Ok(()) => stats.success += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(
                        feed = %feed,
                        measurement = %point.measurement,
                        error = %e,
                        "Failed to publish point"
                    );
                }
            }
        }

        stats
    }

    /// Publish raw bytes to a key (for status messages, etc.).
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(key, payload)
            .await
            .map_err(|e| AgentError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    /// Publish a JSON value to a key.
    pub async fn publish_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(key, payload).await
    }
}

/// Statistics from a batch publish operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct PublishStats {
    /// Number of successfully published points.
    pub success: usize,
    /// Number of failed publishes.
    pub failed: usize,
}

impl PublishStats {
    /// Total number of attempted publishes.
    pub fn total(&self) -> usize {
        self.success + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            (self.success as f64 / self.total() as f64) * 100.0
        }
    }
}

//! Zenoh-backed [`Feeder`].
//!
//! Inputs push batches into a bounded queue; a single [`FeedWorker`]
//! drains it and publishes every point. Last-error reports go through the
//! same queue so they are published in order with the data they relate to.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use datakit_common::{Category, Point};

use crate::error::{AgentError, Result};
use crate::feeder::{FeedOptions, Feeder, LastError};
use crate::health::AgentHealth;
use crate::publisher::Publisher;

enum Outgoing {
    Batch {
        name: String,
        category: Category,
        points: Vec<Point>,
        options: FeedOptions,
    },
    Error(LastError),
}

/// Feeder handle shared by all inputs.
#[derive(Clone)]
pub struct ZenohFeeder {
    tx: mpsc::Sender<Outgoing>,
    health: Arc<AgentHealth>,
}

/// Publishing side of a [`ZenohFeeder`].
pub struct FeedWorker {
    rx: mpsc::Receiver<Outgoing>,
    publisher: Publisher,
    health: Arc<AgentHealth>,
}

impl ZenohFeeder {
    /// Create a feeder and the worker that must be spawned to drain it.
    pub fn new(
        publisher: Publisher,
        health: Arc<AgentHealth>,
        queue_size: usize,
    ) -> (Self, FeedWorker) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let feeder = Self {
            tx,
            health: health.clone(),
        };
        let worker = FeedWorker {
            rx,
            publisher,
            health,
        };
        (feeder, worker)
    }

    pub fn health(&self) -> &Arc<AgentHealth> {
        &self.health
    }
}

impl Feeder for ZenohFeeder {
    async fn feed(
        &self,
        name: &str,
        category: Category,
        points: Vec<Point>,
        options: FeedOptions,
    ) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let count = points.len();
        let blocking = options.blocking;
        let msg = Outgoing::Batch {
            name: name.to_string(),
            category,
            points,
            options,
        };

        if blocking {
            return self.tx.send(msg).await.map_err(|_| AgentError::FeedClosed);
        }

        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(AgentError::FeedQueueFull {
                name: name.to_string(),
                points: count,
            }),
            Err(TrySendError::Closed(_)) => Err(AgentError::FeedClosed),
        }
    }

    fn feed_last_error(&self, error: LastError) {
        tracing::debug!(
            input = %error.input,
            source = %error.source,
            error = %error.message,
            "Recording last error"
        );
        self.health.record_last_error(&error);

        if let Err(e) = self.tx.try_send(Outgoing::Error(error)) {
            tracing::warn!(error = %e, "Dropping last-error report");
        }
    }

    fn record_scrape(&self, target: &str, error: Option<&str>) {
        self.health.record_scrape(target, error);
    }
}

impl FeedWorker {
    /// Publish queued batches until every feeder handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(prefix = %self.publisher.key_prefix(), "Feed worker started");

        while let Some(msg) = self.rx.recv().await {
            match msg {
                Outgoing::Batch {
                    name,
                    category,
                    points,
                    options,
                } => {
                    let stats = self
                        .publisher
                        .publish_batch(category, &name, &points)
                        .await;
                    self.health.record_points_published(stats.success as u64);
                    tracing::debug!(
                        feed = %name,
                        source = %options.source,
                        category = %category,
                        published = stats.success,
                        failed = stats.failed,
                        cost_ms = options.collect_cost.as_millis() as u64,
                        "Published batch"
                    );
                }
                Outgoing::Error(error) => {
                    if let Err(e) = self.health.publish_error(&error).await {
                        tracing::warn!(error = %e, "Failed to publish last error");
                    }
                }
            }
        }

        tracing::info!("Feed worker stopped");
    }
}

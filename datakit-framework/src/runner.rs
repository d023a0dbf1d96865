//! Agent runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use datakit_common::{LoggingConfig, connect, init_tracing};

use crate::AgentArgs;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::health::AgentHealth;
use crate::publisher::Publisher;
use crate::status::{RunState, StatusBoard};
use crate::zenoh_feeder::ZenohFeeder;

/// How long workers get to finish in-flight work after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How often the health snapshot is published.
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Runner that manages the lifecycle of an agent.
///
/// Handles:
/// - Logging initialization
/// - Zenoh connection
/// - The shared feed and its publish worker
/// - Worker spawning and graceful shutdown on Ctrl+C
/// - Status (with the registered inputs) and health publishing
///
/// # Example
///
/// ```ignore
/// use datakit_framework::{AgentArgs, AgentConfig, AgentRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = AgentArgs::parse_with_default("datakit.toml");
///     let config = MyAgentConfig::load(&args.config)?;
///
///     let mut runner = AgentRunner::new_with_args("my-agent", config, Some(&args)).await?;
///     let feeder = runner.feeder();
///     let shutdown = runner.shutdown_signal();
///     runner.spawn(async move { my_input(feeder, shutdown).await });
///
///     runner.run().await
/// }
/// ```
pub struct AgentRunner<C: AgentConfig> {
    name: String,
    version: String,
    config: C,
    session: Arc<zenoh::Session>,
    publisher: Publisher,
    feeder: Arc<ZenohFeeder>,
    health: Arc<AgentHealth>,
    status: StatusBoard,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    feed_task: JoinHandle<()>,
}

impl<C: AgentConfig> AgentRunner<C> {
    /// Create a new agent runner.
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a new agent runner with CLI args for log level override.
    ///
    /// This will:
    /// 1. Initialize logging based on config (with optional CLI override)
    /// 2. Connect to Zenoh
    /// 3. Start the feed worker
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&AgentArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| AgentError::config(e.to_string()))?;

        tracing::info!(agent = %name, version = %version, "Starting agent");

        let session = Arc::new(
            connect(config.zenoh())
                .await
                .map_err(|e| AgentError::ZenohConnection(e.to_string()))?,
        );

        let feed = config.feed();
        let publisher = Publisher::new(session.clone(), &feed.key_prefix, feed.format);
        let health = Arc::new(AgentHealth::new(&name).with_publisher(publisher.clone()));
        let (feeder, worker) =
            ZenohFeeder::new(publisher.clone(), health.clone(), feed.queue_size);
        let feed_task = tokio::spawn(worker.run());

        let status = StatusBoard::new(&name, &version);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            name,
            version,
            config,
            session,
            publisher,
            feeder: Arc::new(feeder),
            health,
            status,
            shutdown_tx,
            tasks: Vec::new(),
            feed_task,
        })
    }

    /// Get the agent name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the agent version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a clone of the publisher.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Get the shared feeder.
    pub fn feeder(&self) -> Arc<ZenohFeeder> {
        self.feeder.clone()
    }

    /// Get the health tracker.
    pub fn health(&self) -> Arc<AgentHealth> {
        self.health.clone()
    }

    /// A receiver that flips to `true` when the process is shutting down.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Announce an input in the agent status.
    pub fn register_input(&mut self, source: impl Into<String>, targets: usize) {
        self.status.register_input(source, targets);
    }

    /// Spawn a worker task.
    ///
    /// Workers are expected to watch [`shutdown_signal`](Self::shutdown_signal)
    /// and return on their own; stragglers are aborted after a grace period.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(future));
    }

    /// Run the agent until Ctrl+C is received.
    ///
    /// This will:
    /// 1. Publish "running" status
    /// 2. Publish health periodically until Ctrl+C
    /// 3. Signal shutdown and give workers a grace period to finish
    /// 4. Publish "offline" status and close the Zenoh session
    pub async fn run(self) -> Result<()> {
        if let Err(e) = self.status.announce(&self.publisher, RunState::Running).await {
            tracing::warn!(error = %e, "Failed to publish running status");
        }

        tracing::info!(
            agent = %self.name,
            tasks = self.tasks.len(),
            "Agent running. Press Ctrl+C to stop."
        );

        let mut health_tick = tokio::time::interval(HEALTH_INTERVAL);
        loop {
            tokio::select! {
                res = signal::ctrl_c() => {
                    if let Err(e) = res {
                        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    }
                    break;
                }
                _ = health_tick.tick() => {
                    if let Err(e) = self.health.publish_health().await {
                        tracing::warn!(error = %e, "Failed to publish health");
                    }
                }
            }
        }

        tracing::info!(agent = %self.name, "Received shutdown signal");
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!(agent = %self.name, "Worker did not stop in time, aborting");
                abort.abort();
            }
        }

        // Dropping the last feeder handle lets the worker drain and exit.
        drop(self.feeder);
        if tokio::time::timeout(SHUTDOWN_GRACE, self.feed_task)
            .await
            .is_err()
        {
            tracing::warn!("Feed worker did not drain in time");
        }

        if let Err(e) = self.status.announce(&self.publisher, RunState::Offline).await {
            tracing::warn!(error = %e, "Failed to publish offline status");
        }

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(agent = %self.name, "Goodbye!");

        Ok(())
    }
}

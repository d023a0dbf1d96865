//! Datakit Agent Framework
//!
//! Plumbing shared by Datakit inputs: where points go once built, how the
//! agent starts and stops, and how its health is reported.
//!
//! # Overview
//!
//! This framework provides:
//! - [`Feeder`] the sink interface inputs feed points and last-errors into
//! - [`ZenohFeeder`] a queued [`Feeder`] publishing to Zenoh
//! - [`MemoryFeeder`] an in-memory [`Feeder`] for dry runs and tests
//! - [`AgentConfig`] trait for configuration loading and validation
//! - [`AgentRunner`] for managing agent lifecycle (startup, shutdown, signal handling)
//! - [`AgentHealth`] for per-target liveness and last-error tracking
//! - [`AgentArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use datakit_framework::{AgentArgs, AgentConfig, AgentRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = AgentArgs::parse_with_default("datakit.toml");
//!     let config = MyAgentConfig::load(&args.config)?;
//!
//!     let mut runner = AgentRunner::new_with_args("my-agent", config, Some(&args)).await?;
//!     runner.spawn(my_input(runner.feeder(), runner.shutdown_signal()));
//!
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
mod error;
mod feeder;
mod health;
mod publisher;
mod runner;
mod status;
mod zenoh_feeder;

pub use args::AgentArgs;
pub use config::{AgentConfig, FeedConfig};
pub use error::{AgentError, Result};
pub use feeder::{ErrorType, FedBatch, FeedOptions, Feeder, LastError, MemoryFeeder};
pub use health::{AgentHealth, HealthSnapshot, TargetLiveness, TargetStatus};
pub use publisher::{PublishStats, Publisher};
pub use runner::AgentRunner;
pub use status::{AgentStatus, InputSummary, RunState};
pub use zenoh_feeder::{FeedWorker, ZenohFeeder};

// Re-export commonly used types from datakit-common
pub use datakit_common::{
    Category, FieldValue, Format, LoggingConfig, Point, StaticTagger, Tagger, ZenohConfig,
};

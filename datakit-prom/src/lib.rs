//! Generic Prometheus exposition scraping input for Datakit.
//!
//! Each configured input polls its targets on an interval and runs every
//! body through the same pipeline:
//!
//! ```text
//! fetch (HTTP / Unix socket / file)
//!   -> parser    text exposition -> samples
//!   -> classify  type and name filters, measurement/field routing
//!   -> tags      global, static, label, info and instance tags
//!   -> builder   one point per (measurement, tag set)
//!   -> output    metric or logging feed, or a raw dump file
//! ```
//!
//! Every target also yields an `up` gauge (1 on success, 0 on failure).
//!
//! # Configuration
//!
//! ```toml
//! [[inputs.prom]]
//! source = "etcd"
//! urls = ["http://127.0.0.1:2379/metrics"]
//! interval = "30s"
//! measurements = [{ prefix = "etcd_network_", name = "etcd_network" }]
//! tags_ignore = ["ignore_me"]
//!
//! [inputs.prom.tags_rename.mapping]
//! cause = "__cause"
//! ```

pub mod builder;
pub mod classify;
pub mod config;
pub mod error;
pub mod input;
pub mod output;
pub mod parser;
pub mod scrape;
pub mod tags;
pub mod transport;

pub use classify::{Classifier, MeasurementRule};
pub use config::{AsLoggingConfig, AuthConfig, PromAgentConfig, PromInputConfig, TagsRenameConfig};
pub use error::{PromError, Result};
pub use input::{CycleReport, InputHandle, InputState, PromInput, ScrapeTarget};
pub use output::{DumpFile, OutputAdapter};
pub use parser::{ExpositionParser, MetricType, ParseError, Sample, parse_text};
pub use scrape::{ScrapePipeline, ScrapeResult};
pub use tags::{TagEnricher, UrlTagSet};

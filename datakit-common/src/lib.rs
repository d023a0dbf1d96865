//! Datakit Common Library
//!
//! Shared types and utilities for Datakit inputs:
//!
//! - [`point`] - Point data model (`Point`, `FieldValue`, `Category`)
//! - [`schema`] - Measurement schema tables (`MeasurementSchema`, `SchemaRegistry`)
//! - [`tagger`] - Global tag providers (`Tagger`, `StaticTagger`)
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Configuration loading (JSON5 and TOML)
//! - [`session`] - Zenoh session management
//! - [`keyexpr`] - Key expression builders and parsers
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod point;
pub mod schema;
pub mod serialization;
pub mod session;
pub mod tagger;

// Re-export commonly used types at the crate root
pub use config::{
    ConfigFormat, LogFormat, LoggingConfig, ZenohConfig, load_config, parse_config,
    parse_config_as,
};
pub use error::{Error, Result};
pub use keyexpr::{KEY_PREFIX, KeyExprBuilder, ParsedKeyExpr, parse_key_expr};
pub use point::{Category, FieldValue, Point, current_timestamp_nanos};
pub use schema::{FieldKind, FieldSpec, MeasurementSchema, SchemaRegistry, TagSpec};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;
pub use tagger::{GlobalTagsConfig, StaticTagger, Tagger};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}

use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// Translate our connection settings into a Zenoh configuration.
pub fn zenoh_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    if !matches!(config.mode.as_str(), "client" | "peer" | "router") {
        return Err(Error::config(format!(
            "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
            config.mode
        )));
    }

    let mut zenoh_config = zenoh::Config::default();
    insert(&mut zenoh_config, "mode", &format!("\"{}\"", config.mode))?;

    for (key, endpoints) in [
        ("connect/endpoints", &config.connect),
        ("listen/endpoints", &config.listen),
    ] {
        if endpoints.is_empty() {
            continue;
        }
        let json = serde_json::to_string(endpoints)?;
        insert(&mut zenoh_config, key, &json)?;
    }

    Ok(zenoh_config)
}

fn insert(zenoh_config: &mut zenoh::Config, key: &str, value: &str) -> Result<()> {
    zenoh_config
        .insert_json5(key, value)
        .map_err(|e| Error::config(format!("Failed to set {}: {}", key, e)))
}

/// Connect to Zenoh using the provided configuration.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let zenoh_config = zenoh_config(config)?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Connecting to Zenoh"
    );

    let session = zenoh::open(zenoh_config).await?;

    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}

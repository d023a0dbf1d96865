//! Datakit agent scraping Prometheus exporters.
//!
//! Runs every `[[inputs.prom]]` of the configuration and publishes the
//! resulting points to Zenoh.

use std::sync::Arc;

use anyhow::Result;
use datakit_common::{StaticTagger, Tagger};
use datakit_framework::{AgentArgs, AgentConfig, AgentRunner, MemoryFeeder};

use datakit_prom::{PromAgentConfig, PromInput};

#[tokio::main]
async fn main() -> Result<()> {
    let args = AgentArgs::parse_with_default("prom.toml");

    let config = PromAgentConfig::load(&args.config).map_err(|e| anyhow::anyhow!("{}", e))?;
    let tagger: Arc<dyn Tagger> = Arc::new(StaticTagger::from_config(&config.global_tags));

    if args.dry_run {
        return dry_run(config, tagger).await;
    }

    let mut runner = AgentRunner::new_with_args("prom", config, Some(&args))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let inputs = runner.config().inputs.prom.clone();
    for input_config in inputs {
        let targets = input_config.targets().len();
        tracing::info!(
            source = %input_config.source,
            targets,
            interval = ?input_config.interval,
            "Starting prom input"
        );
        runner.register_input(&input_config.source, targets);
        let (input, _handle) = PromInput::new(input_config, runner.feeder(), tagger.clone());
        let input = input.with_shutdown(runner.shutdown_signal());
        runner.spawn(input.run());
    }

    runner
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}

/// Collect every input once and print the points.
async fn dry_run(config: PromAgentConfig, tagger: Arc<dyn Tagger>) -> Result<()> {
    datakit_common::init_tracing(config.logging()).map_err(|e| anyhow::anyhow!("{}", e))?;

    let feeder = Arc::new(MemoryFeeder::new());
    for input_config in config.inputs.prom {
        let source = input_config.source.clone();
        let (mut input, _handle) = PromInput::new(input_config, feeder.clone(), tagger.clone());
        let report = input.collect_once().await?;
        tracing::info!(
            source = %source,
            ok = report.targets_ok,
            failed = report.targets_failed,
            points = report.points,
            "Collected"
        );
    }

    for point in feeder.points() {
        println!("{}", point);
    }
    for error in feeder.last_errors() {
        eprintln!("{}: {}", error.source, error.message);
    }
    Ok(())
}

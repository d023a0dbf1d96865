//! CLI argument parsing for agents.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for all agents.
#[derive(Parser, Debug, Clone)]
#[command(about = "Datakit input agent")]
pub struct AgentArgs {
    /// Path to configuration file (TOML or JSON5).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Collect once, print the points as line protocol and exit.
    #[arg(long)]
    pub dry_run: bool,
}

impl AgentArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If no `--config` argument is provided, uses the default.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        let matches = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .get_matches();

        <Self as clap::FromArgMatches>::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }

    /// Parse CLI arguments (requires --config to be specified).
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_from_iter() {
        let args = AgentArgs::try_parse_from(["datakit-prom", "-c", "prom.toml", "--log-level", "debug"])
            .unwrap();
        assert_eq!(args.config, PathBuf::from("prom.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(!args.dry_run);
    }

    #[test]
    fn test_dry_run_flag() {
        let args = AgentArgs::try_parse_from(["datakit-prom", "-c", "prom.toml", "--dry-run"]).unwrap();
        assert!(args.dry_run);
    }

    #[test]
    fn test_config_required() {
        assert!(AgentArgs::try_parse_from(["datakit-prom"]).is_err());
    }
}

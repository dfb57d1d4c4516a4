//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// claw-routing - route, group and inhibit alerts.
#[derive(Parser, Debug, Clone)]
#[command(name = "claw-routing")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Routing configuration file (TOML).
    #[arg(short, long, env = "CLAW_ROUTING_CONFIG", default_value = "routing.toml")]
    pub config: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable output.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Validate the configuration and exit.
    Check,

    /// Print the compiled route tree.
    Routes,

    /// Show which receivers an alert with the given labels is routed to.
    Test {
        /// Alert labels.
        #[arg(required = true, value_name = "NAME=VALUE")]
        labels: Vec<String>,
    },

    /// Route alerts read as JSON lines and print webhook payloads.
    ///
    /// Runs until the input ends (or Ctrl-C), then drains pending groups.
    Run(RunArgs),
}

/// Arguments for the run command.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// File with one JSON alert per line; `-` reads standard input.
    #[arg(short, long, default_value = "-")]
    pub alerts: String,

    /// Maximum alerts per printed payload (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_alerts: usize,

    /// Seconds between garbage collection passes.
    #[arg(long, default_value_t = 60)]
    pub gc_interval_secs: u64,

    /// URL reported as `externalURL` in printed payloads.
    #[arg(long, env = "CLAW_ROUTING_EXTERNAL_URL", default_value = "")]
    pub external_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_help_does_not_panic() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_check_command() {
        let cli = Cli::parse_from(["claw-routing", "check"]);
        assert!(matches!(cli.command, Commands::Check));
        assert_eq!(cli.config, PathBuf::from("routing.toml"));
        assert_eq!(cli.format, Format::Table);
    }

    #[test]
    fn parse_routes_with_config_and_json() {
        let cli = Cli::parse_from(["claw-routing", "-c", "am.toml", "--format", "json", "routes"]);
        assert!(matches!(cli.command, Commands::Routes));
        assert_eq!(cli.config, PathBuf::from("am.toml"));
        assert_eq!(cli.format, Format::Json);
    }

    #[test]
    fn parse_test_labels() {
        let cli = Cli::parse_from(["claw-routing", "test", "alertname=Down", "severity=critical"]);
        match cli.command {
            Commands::Test { labels } => {
                assert_eq!(labels, vec!["alertname=Down", "severity=critical"]);
            }
            _ => panic!("expected Test command"),
        }
    }

    #[test]
    fn test_requires_labels() {
        let result = Cli::try_parse_from(["claw-routing", "test"]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["claw-routing", "run"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.alerts, "-");
                assert_eq!(args.max_alerts, 0);
                assert_eq!(args.gc_interval_secs, 60);
                assert_eq!(args.external_url, "");
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn parse_run_with_file() {
        let cli = Cli::parse_from([
            "claw-routing",
            "run",
            "--alerts",
            "alerts.jsonl",
            "--max-alerts",
            "5",
            "--external-url",
            "http://am:9093",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.alerts, "alerts.jsonl");
                assert_eq!(args.max_alerts, 5);
                assert_eq!(args.external_url, "http://am:9093");
            }
            _ => panic!("expected Run command"),
        }
    }
}

//! claw-routing binary entrypoint.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use claw_routing::cli::{Cli, Commands};
use claw_routing::{commands, Config};

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Check => {
            commands::check(&mut stdout, &config, cli.format)?;
        }
        Commands::Routes => {
            commands::routes(&mut stdout, &config, cli.format)?;
        }
        Commands::Test { labels } => {
            commands::test_route(&mut stdout, &config, &labels, cli.format)?;
        }
        Commands::Run(args) => {
            drop(stdout);
            let report = commands::run(&config, &args).await?;
            eprintln!(
                "delivered {} notifications ({} failed)",
                report.delivered, report.failed
            );
        }
    }

    Ok(())
}

//! Clusterflow CLI Binary
//!
//! Operator view over the operations and clusters a control plane has recorded.

use anyhow::Context;
use clap::Parser;
use clusterflow::cli::{map_error, Cli, RunContext};
use clusterflow::config::ConfigLoader;
use clusterflow::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(&cli) {
        error!("Command failed: {:#}", e);
        let message = match e.downcast_ref::<clusterflow::error::EngineError>() {
            Some(engine_err) => map_error(engine_err),
            None => format!("{:#}", e),
        };
        eprintln!("{}", message);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let context = RunContext::new(cli.config.clone(), cli.store.clone())
        .context("failed to load configuration")?;
    info!(store = %context.config().storage.path.display(), "clusterflow CLI starting");
    let output = context.execute(&cli.command)?;
    println!("{}", output);
    Ok(())
}

/// Logging settings: CLI flags over the config file over defaults.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = ConfigLoader::load(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();
    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    config
}

//! examgen CLI Binary

use anyhow::Context;
use clap::Parser;
use examgen::cli::{Cli, RunContext};
use examgen::config::{ConfigLoader, ExamgenConfig};
use examgen::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let config = ConfigLoader::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&build_logging_config(cli, &config)).context("Failed to initialize logging")?;
    info!("examgen starting");

    let context = RunContext::new(config).context("Failed to open examgen runtime")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let output = runtime.block_on(context.execute(&cli.command))?;
    Ok(output)
}

/// CLI flags override the config file.
fn build_logging_config(cli: &Cli, config: &ExamgenConfig) -> LoggingConfig {
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        logging.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        logging.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        logging.output = output.clone();
    }
    logging
}

use std::io;

use anyhow::Result;
use clap::Parser;
use nlpsol_cli::cli::{Cli, Commands};
use nlpsol_cli::config::load_config;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;

fn init_logging(default_level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));
    debug!("nlpsol v{} with config {:?}", env!("CARGO_PKG_VERSION"), config);

    match cli.command {
        Commands::Solve(args) => commands::solve::run(&args, &config),
        Commands::Check {
            problem,
            backend,
            options,
        } => commands::check::run(&problem, backend.as_deref(), &options, &config),
        Commands::Backends { format } => commands::backends::run(format),
    }
}
